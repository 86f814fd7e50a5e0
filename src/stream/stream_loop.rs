//! Per-viewer frame loop: capture, classify, poll the track, aggregate, render.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use futures::Stream;
use serde::Serialize;
use tracing::{debug, warn};

use crate::camera::{render, CameraManager, Frame};
use crate::emotion::{EmotionAggregator, EmotionClassifier, EmotionDetection};
use crate::server::metrics;
use crate::tracking::{TrackSnapshot, TrackSource};

pub const MJPEG_BOUNDARY: &str = "frame";

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub fps: u32,
    pub idle_frame_interval: Duration,
    pub poll_timeout: Duration,
    pub max_consecutive_classifier_errors: u32,
    pub jpeg_quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            idle_frame_interval: Duration::from_millis(200),
            poll_timeout: Duration::from_millis(2000),
            max_consecutive_classifier_errors: 30,
            jpeg_quality: 80,
        }
    }
}

/// What the last processed frame showed, per user.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamStatus {
    pub emotion: Option<String>,
    pub confidence: Option<f32>,
    pub song: String,
    pub artist: String,
    pub song_id: Option<String>,
}

#[derive(Default)]
pub struct StreamStatusBoard {
    statuses: Mutex<HashMap<usize, StreamStatus>>,
}

impl StreamStatusBoard {
    pub fn get(&self, user_id: usize) -> Option<StreamStatus> {
        self.statuses.lock().unwrap().get(&user_id).cloned()
    }

    fn set(&self, user_id: usize, status: StreamStatus) {
        self.statuses.lock().unwrap().insert(user_id, status);
    }

    fn remove(&self, user_id: usize) {
        self.statuses.lock().unwrap().remove(&user_id);
    }
}

/// Shared collaborators every stream is built from.
#[derive(Clone)]
pub struct StreamDeps {
    pub camera: Arc<CameraManager>,
    pub classifier: Arc<dyn EmotionClassifier>,
    pub tracks: Arc<dyn TrackSource>,
    pub aggregator: Arc<EmotionAggregator>,
    pub statuses: Arc<StreamStatusBoard>,
    pub config: StreamConfig,
}

/// One viewer's stream. Anonymous viewers get the rendered feed without any song
/// correlation. Dropping the loop finalizes the viewer's current song.
pub struct StreamLoop {
    user_id: Option<usize>,
    deps: StreamDeps,
    consecutive_classifier_errors: u32,
    last_frame_at: Option<Instant>,
}

impl StreamLoop {
    pub fn new(user_id: Option<usize>, deps: StreamDeps) -> Self {
        Self {
            user_id,
            deps,
            consecutive_classifier_errors: 0,
            last_frame_at: None,
        }
    }

    /// Waits for the next frame slot and returns the frame to emit as JPEG.
    pub async fn next_frame(&mut self) -> Vec<u8> {
        if !self.deps.camera.is_active() {
            tokio::time::sleep(self.deps.config.idle_frame_interval).await;
            return self.placeholder();
        }

        self.pace().await;
        let generation = self.deps.camera.generation();
        match self.deps.camera.read_frame().await {
            Ok(frame) => self.process_frame(frame, Some(generation)).await,
            Err(err) => {
                debug!("No camera frame: {}", err);
                self.placeholder()
            }
        }
    }

    /// Runs one frame through classification and song correlation.
    pub async fn process(&mut self, frame: Frame) -> Vec<u8> {
        self.process_frame(frame, None).await
    }

    /// `generation` is the camera generation the frame was captured in. Its emotion is
    /// only counted if the camera was not turned off while the frame was in flight.
    async fn process_frame(&mut self, frame: Frame, generation: Option<u64>) -> Vec<u8> {
        let detection = self.classify(&frame).await;
        let emotion = detection.as_ref().map(|d| d.label.as_str());
        metrics::record_frame_processed(emotion);

        if let Some(user_id) = self.user_id {
            let snapshot = self.poll_track(user_id).await;
            if let Some(snapshot) = &snapshot {
                let camera = &self.deps.camera;
                self.deps
                    .aggregator
                    .observe_if(user_id, snapshot, emotion, || {
                        generation.map_or(true, |g| camera.is_current(g))
                    })
                    .await;
            }
            self.publish_status(user_id, detection.as_ref(), snapshot);
        }

        match render::render_frame(frame, detection.as_ref(), self.deps.config.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                warn!("Failed to render frame: {}", err);
                self.placeholder()
            }
        }
    }

    async fn classify(&mut self, frame: &Frame) -> Option<EmotionDetection> {
        match self.deps.classifier.classify(frame).await {
            Ok(detection) => {
                self.consecutive_classifier_errors = 0;
                detection
            }
            Err(err) => {
                metrics::record_classifier_error();
                self.consecutive_classifier_errors += 1;
                debug!(
                    "Emotion classification failed ({} in a row): {:#}",
                    self.consecutive_classifier_errors, err
                );
                if self.consecutive_classifier_errors
                    >= self.deps.config.max_consecutive_classifier_errors
                {
                    if let Some(user_id) = self.user_id {
                        warn!(
                            "Classifier failed {} times in a row, resetting song tracking of user {}",
                            self.consecutive_classifier_errors, user_id
                        );
                        self.deps.aggregator.reset(user_id).await;
                    }
                    self.consecutive_classifier_errors = 0;
                }
                None
            }
        }
    }

    /// None when the source did not answer in time.
    async fn poll_track(&self, user_id: usize) -> Option<TrackSnapshot> {
        match tokio::time::timeout(self.deps.config.poll_timeout, self.deps.tracks.poll(user_id))
            .await
        {
            Ok(snapshot) => Some(snapshot),
            Err(_) => {
                metrics::record_track_poll_timeout();
                debug!("Track poll for user {} timed out", user_id);
                None
            }
        }
    }

    fn publish_status(
        &self,
        user_id: usize,
        detection: Option<&EmotionDetection>,
        snapshot: Option<TrackSnapshot>,
    ) {
        let snapshot = snapshot.unwrap_or_default();
        self.deps.statuses.set(
            user_id,
            StreamStatus {
                emotion: detection.map(|d| d.label.clone()),
                confidence: detection.map(|d| d.confidence),
                song: snapshot.name,
                artist: snapshot.artist,
                song_id: snapshot.track_id,
            },
        );
    }

    async fn pace(&mut self) {
        let fps = self.deps.config.fps.max(1);
        let frame_interval = Duration::from_secs_f64(1.0 / fps as f64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < frame_interval {
                tokio::time::sleep(frame_interval - elapsed).await;
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn placeholder(&self) -> Vec<u8> {
        render::encode_jpeg(
            &render::placeholder_frame().image,
            self.deps.config.jpeg_quality,
        )
        .unwrap_or_default()
    }

    /// The never-ending multipart body of `/video_feed`.
    pub fn into_mjpeg_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            let jpeg = stream.next_frame().await;
            Some((Ok(mjpeg_part(&jpeg)), stream))
        })
    }
}

impl Drop for StreamLoop {
    fn drop(&mut self) {
        let Some(user_id) = self.user_id else {
            return;
        };
        self.deps.statuses.remove(user_id);
        let aggregator = self.deps.aggregator.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                aggregator.release(user_id).await;
            });
        }
    }
}

pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MJPEG_BOUNDARY).as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n\r\n");
    Bytes::from(part)
}
