//! Camera capture, on/off state and frame rendering.

mod frame_source;
mod manager;
pub mod render;

pub use frame_source::{FrameSource, SnapshotFrameSource};
pub use manager::CameraManager;

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera initializing")]
    Initializing,

    #[error("Failed to start camera: {0}")]
    Unavailable(String),

    #[error("Frame error: {0}")]
    Frame(String),
}

impl From<image::ImageError> for CameraError {
    fn from(err: image::ImageError) -> Self {
        CameraError::Frame(err.to_string())
    }
}

/// A decoded RGB frame. `jpeg` keeps the encoded bytes the frame was decoded from, when
/// there were any, so untouched frames can be re-emitted without re-encoding.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub jpeg: Option<Vec<u8>>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Frame { image, jpeg: None }
    }

    pub fn from_jpeg(bytes: Vec<u8>) -> Result<Self, CameraError> {
        let image = image::load_from_memory(&bytes)?.to_rgb8();
        Ok(Frame {
            image,
            jpeg: Some(bytes),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_jpeg_frames() {
        let source = render::placeholder_frame();
        let bytes = render::encode_jpeg(&source.image, 80).unwrap();

        let frame = Frame::from_jpeg(bytes.clone()).unwrap();
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.jpeg, Some(bytes));
    }

    #[test]
    fn rejects_garbage_frames() {
        let err = Frame::from_jpeg(b"not a jpeg".to_vec()).unwrap_err();
        assert!(matches!(err, CameraError::Frame(_)));
    }

    #[test]
    fn error_messages() {
        assert_eq!(CameraError::Initializing.to_string(), "Camera initializing");
        assert!(CameraError::Unavailable("no device".to_string())
            .to_string()
            .starts_with("Failed to start camera"));
    }
}
