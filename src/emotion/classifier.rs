use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::camera::{render, Frame};

/// Face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionDetection {
    pub label: String,
    pub confidence: f32,
    pub face: Option<FaceBox>,
}

#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    /// Ok(None) when no face was found.
    async fn classify(&self, frame: &Frame) -> Result<Option<EmotionDetection>>;
}

/// One face as reported by a FER-style detection service.
#[derive(Debug, Deserialize)]
struct DetectedFace {
    #[serde(rename = "box")]
    bounding_box: [i64; 4],
    emotions: BTreeMap<String, f32>,
}

impl DetectedFace {
    /// Highest scoring emotion. Equal scores go to the alphabetically first label.
    fn top_emotion(&self) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (label, score) in &self.emotions {
            let better = match best {
                Some((_, max)) => *score > max,
                None => true,
            };
            if better {
                best = Some((label, *score));
            }
        }
        best
    }

    fn face_box(&self) -> FaceBox {
        let [x, y, w, h] = self.bounding_box;
        let clamp = |v: i64| v.clamp(0, u32::MAX as i64) as u32;
        FaceBox {
            x: clamp(x),
            y: clamp(y),
            width: clamp(w),
            height: clamp(h),
        }
    }
}

/// Posts each frame as JPEG to an emotion detection service answering with
/// `[{"box": [x, y, w, h], "emotions": {"happy": 0.93, ...}}, ...]`.
pub struct HttpEmotionClassifier {
    client: reqwest::Client,
    url: String,
    min_confidence: f32,
    jpeg_quality: u8,
}

impl HttpEmotionClassifier {
    pub fn new(url: String, timeout: Duration, min_confidence: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create classifier HTTP client")?;
        Ok(Self {
            client,
            url,
            min_confidence,
            jpeg_quality: 85,
        })
    }

    fn pick(&self, faces: Vec<DetectedFace>) -> Option<EmotionDetection> {
        let face = faces.first()?;
        let (label, confidence) = face.top_emotion()?;
        if confidence < self.min_confidence {
            return None;
        }
        Some(EmotionDetection {
            label: label.to_string(),
            confidence,
            face: Some(face.face_box()),
        })
    }
}

#[async_trait]
impl EmotionClassifier for HttpEmotionClassifier {
    async fn classify(&self, frame: &Frame) -> Result<Option<EmotionDetection>> {
        let body = match &frame.jpeg {
            Some(jpeg) => jpeg.clone(),
            None => render::encode_jpeg(&frame.image, self.jpeg_quality)?,
        };

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .await
            .context("Failed to reach emotion classifier")?;

        if !response.status().is_success() {
            bail!("Emotion classifier answered with status {}", response.status());
        }

        let faces: Vec<DetectedFace> = response
            .json()
            .await
            .context("Failed to parse emotion classifier response")?;
        Ok(self.pick(faces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(min_confidence: f32) -> HttpEmotionClassifier {
        HttpEmotionClassifier::new(
            "http://127.0.0.1:9/detect".to_string(),
            Duration::from_millis(200),
            min_confidence,
        )
        .unwrap()
    }

    fn parse(json: &str) -> Vec<DetectedFace> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn picks_top_emotion_of_first_face() {
        let faces = parse(
            r#"[
                {"box": [10, 20, 30, 40], "emotions": {"angry": 0.1, "happy": 0.7, "sad": 0.2}},
                {"box": [0, 0, 5, 5], "emotions": {"fear": 0.99}}
            ]"#,
        );

        let detection = classifier(0.0).pick(faces).unwrap();
        assert_eq!(detection.label, "happy");
        assert!((detection.confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(
            detection.face,
            Some(FaceBox {
                x: 10,
                y: 20,
                width: 30,
                height: 40
            })
        );
    }

    #[test]
    fn no_faces_means_no_detection() {
        assert!(classifier(0.0).pick(parse("[]")).is_none());
        assert!(classifier(0.0)
            .pick(parse(r#"[{"box": [0, 0, 1, 1], "emotions": {}}]"#))
            .is_none());
    }

    #[test]
    fn low_confidence_is_a_miss() {
        let faces = parse(r#"[{"box": [0, 0, 1, 1], "emotions": {"sad": 0.3}}]"#);
        assert!(classifier(0.5).pick(faces).is_none());
    }

    #[test]
    fn equal_scores_resolve_by_label() {
        let faces = parse(r#"[{"box": [0, 0, 1, 1], "emotions": {"sad": 0.5, "neutral": 0.5}}]"#);
        assert_eq!(classifier(0.0).pick(faces).unwrap().label, "neutral");
    }

    #[test]
    fn negative_box_coordinates_are_clamped() {
        let faces = parse(r#"[{"box": [-4, 2, 10, 10], "emotions": {"happy": 1.0}}]"#);
        let face = classifier(0.0).pick(faces).unwrap().face.unwrap();
        assert_eq!(face.x, 0);
        assert_eq!(face.y, 2);
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let frame = render::placeholder_frame();
        assert!(classifier(0.0).classify(&frame).await.is_err());
    }
}
