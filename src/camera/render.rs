use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};

use super::{CameraError, Frame};
use crate::emotion::{EmotionDetection, FaceBox};

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;
const PLACEHOLDER_GREY: u8 = 200;
const FACE_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const FACE_BOX_THICKNESS: u32 = 2;

/// Frame shown while the camera is off.
pub fn placeholder_frame() -> Frame {
    Frame::new(RgbImage::from_pixel(
        PLACEHOLDER_WIDTH,
        PLACEHOLDER_HEIGHT,
        Rgb([PLACEHOLDER_GREY; 3]),
    ))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CameraError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
    Ok(buf)
}

/// Draws the detected face box, clipped to the image.
pub fn draw_face_box(image: &mut RgbImage, face: &FaceBox) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || face.x >= width || face.y >= height {
        return;
    }
    let x0 = face.x;
    let y0 = face.y;
    let x1 = face.x.saturating_add(face.width).min(width - 1);
    let y1 = face.y.saturating_add(face.height).min(height - 1);

    for t in 0..FACE_BOX_THICKNESS {
        for x in x0..=x1 {
            if y0 + t <= y1 {
                image.put_pixel(x, y0 + t, FACE_BOX_COLOR);
            }
            if y1 >= y0 + t {
                image.put_pixel(x, y1 - t, FACE_BOX_COLOR);
            }
        }
        for y in y0..=y1 {
            if x0 + t <= x1 {
                image.put_pixel(x0 + t, y, FACE_BOX_COLOR);
            }
            if x1 >= x0 + t {
                image.put_pixel(x1 - t, y, FACE_BOX_COLOR);
            }
        }
    }
}

/// JPEG bytes for the frame with the detection drawn on it.
pub fn render_frame(
    frame: Frame,
    detection: Option<&EmotionDetection>,
    quality: u8,
) -> Result<Vec<u8>, CameraError> {
    match detection.and_then(|d| d.face.as_ref()) {
        Some(face) => {
            let mut image = frame.image;
            draw_face_box(&mut image, face);
            encode_jpeg(&image, quality)
        }
        None => match frame.jpeg {
            Some(jpeg) => Ok(jpeg),
            None => encode_jpeg(&frame.image, quality),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection_with_box(x: u32, y: u32, width: u32, height: u32) -> EmotionDetection {
        EmotionDetection {
            label: "happy".to_string(),
            confidence: 0.9,
            face: Some(FaceBox {
                x,
                y,
                width,
                height,
            }),
        }
    }

    #[test]
    fn placeholder_is_grey_vga() {
        let frame = placeholder_frame();
        assert_eq!(frame.image.dimensions(), (640, 480));
        assert_eq!(frame.image.get_pixel(320, 240), &Rgb([200, 200, 200]));
    }

    #[test]
    fn draws_box_edges_only() {
        let mut image = RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]));
        draw_face_box(
            &mut image,
            &FaceBox {
                x: 10,
                y: 10,
                width: 20,
                height: 20,
            },
        );

        assert_eq!(image.get_pixel(10, 10), &FACE_BOX_COLOR);
        assert_eq!(image.get_pixel(30, 20), &FACE_BOX_COLOR);
        assert_eq!(image.get_pixel(20, 11), &FACE_BOX_COLOR);
        assert_eq!(image.get_pixel(20, 20), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn clips_boxes_running_off_the_image() {
        let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        draw_face_box(
            &mut image,
            &FaceBox {
                x: 15,
                y: 15,
                width: 100,
                height: 100,
            },
        );
        assert_eq!(image.get_pixel(19, 19), &FACE_BOX_COLOR);

        draw_face_box(
            &mut image,
            &FaceBox {
                x: 40,
                y: 40,
                width: 5,
                height: 5,
            },
        );
    }

    #[test]
    fn untouched_frames_reuse_source_bytes() {
        let frame = Frame {
            image: RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])),
            jpeg: Some(vec![0xff, 0xd8, 0xff]),
        };
        assert_eq!(render_frame(frame, None, 80).unwrap(), vec![0xff, 0xd8, 0xff]);
    }

    #[test]
    fn frames_with_faces_are_reencoded() {
        let frame = placeholder_frame();
        let jpeg = render_frame(frame, Some(&detection_with_box(100, 100, 50, 50)), 80).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (640, 480));
    }
}
