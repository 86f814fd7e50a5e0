use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{CameraError, Frame};

/// A capture device.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquires the device and checks that it actually yields a frame.
    async fn open(&self) -> Result<(), CameraError>;

    async fn read_frame(&self) -> Result<Frame, CameraError>;

    async fn release(&self);
}

/// Camera exposed as an HTTP endpoint returning one JPEG per GET, as served by most IP
/// cameras and webcam bridges.
pub struct SnapshotFrameSource {
    client: reqwest::Client,
    url: String,
    opened: AtomicBool,
}

impl SnapshotFrameSource {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create camera HTTP client")?;
        Ok(Self {
            client,
            url,
            opened: AtomicBool::new(false),
        })
    }

    async fn fetch(&self) -> Result<Frame, CameraError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CameraError::Frame(format!("camera request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CameraError::Frame(format!(
                "camera answered with status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CameraError::Frame(format!("failed to read camera frame: {}", e)))?;
        Frame::from_jpeg(bytes.to_vec())
    }
}

#[async_trait]
impl FrameSource for SnapshotFrameSource {
    async fn open(&self) -> Result<(), CameraError> {
        let frame = self
            .fetch()
            .await
            .map_err(|e| CameraError::Unavailable(e.to_string()))?;
        info!(
            "Camera at {} opened ({}x{})",
            self.url,
            frame.width(),
            frame.height()
        );
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read_frame(&self) -> Result<Frame, CameraError> {
        if !self.opened.load(Ordering::SeqCst) {
            return Err(CameraError::Unavailable("camera is not open".to_string()));
        }
        self.fetch().await
    }

    async fn release(&self) {
        if self.opened.swap(false, Ordering::SeqCst) {
            debug!("Camera at {} released", self.url);
        }
    }
}
