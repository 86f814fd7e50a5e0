use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{CameraError, Frame, FrameSource};
use crate::emotion::EmotionAggregator;

/// Owns the on/off state of the single shared camera.
///
/// Turning the camera off persists every in-flight song emotion before the device is
/// released. Transitions are exclusive: a toggle arriving while another transition runs
/// is rejected with [`CameraError::Initializing`].
///
/// Every deactivation bumps the capture generation, so frames captured before the camera
/// went off can be told apart from frames of the current session.
pub struct CameraManager {
    source: Arc<dyn FrameSource>,
    aggregator: Arc<EmotionAggregator>,
    active: AtomicBool,
    generation: AtomicU64,
    transition: Mutex<()>,
}

impl CameraManager {
    pub fn new(source: Arc<dyn FrameSource>, aggregator: Arc<EmotionAggregator>) -> Self {
        Self {
            source,
            aggregator,
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            transition: Mutex::new(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// True while the camera is on and has not been turned off since `generation` was read.
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_active() && self.generation() == generation
    }

    /// Switches the camera on or off and returns the new state.
    pub async fn toggle(&self) -> Result<bool, CameraError> {
        let _transition = self
            .transition
            .try_lock()
            .map_err(|_| CameraError::Initializing)?;

        if self.is_active() {
            self.deactivate().await;
            info!("Camera turned off");
            return Ok(false);
        }

        match self.source.open().await {
            Ok(()) => {
                self.active.store(true, Ordering::SeqCst);
                info!("Camera turned on");
                Ok(true)
            }
            Err(err) => {
                warn!("Failed to start camera: {}", err);
                self.source.release().await;
                Err(err)
            }
        }
    }

    /// Reads the next frame. A failed read re-opens the device once; if that fails
    /// too the camera is turned off.
    pub async fn read_frame(&self) -> Result<Frame, CameraError> {
        if !self.is_active() {
            return Err(CameraError::Unavailable("camera is off".to_string()));
        }
        let err = match self.source.read_frame().await {
            Ok(frame) => return Ok(frame),
            Err(err) => err,
        };
        warn!("Camera read failed, reopening: {}", err);

        let Ok(_transition) = self.transition.try_lock() else {
            return Err(err);
        };
        if !self.is_active() {
            return Err(err);
        }
        self.source.release().await;
        let reopened = match self.source.open().await {
            Ok(()) => self.source.read_frame().await,
            Err(e) => Err(e),
        };
        match reopened {
            Ok(frame) => Ok(frame),
            Err(reopen_err) => {
                warn!("Camera could not be reopened, turning it off: {}", reopen_err);
                self.deactivate().await;
                Err(reopen_err)
            }
        }
    }

    /// Turns the camera off, waiting for any running transition. Used on shutdown.
    pub async fn shutdown(&self) {
        let _transition = self.transition.lock().await;
        if self.is_active() {
            self.deactivate().await;
            info!("Camera turned off for shutdown");
        }
    }

    /// Must be called with the transition lock held.
    async fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.aggregator.flush_all().await;
        self.source.release().await;
    }
}
