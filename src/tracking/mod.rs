//! What the user is listening to right now.
//!
//! A [`TrackSource`] is polled once per frame by the stream loop. It never fails: any
//! error, missing credential or idle player comes back as [`TrackSnapshot::nothing_playing`].

mod cached_source;
mod spotify_source;

pub use cached_source::CachedTrackSource;
pub use spotify_source::SpotifyTrackSource;

use async_trait::async_trait;
use serde::Serialize;

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSnapshot {
    pub track_id: Option<String>,
    pub name: String,
    pub artist: String,
}

impl TrackSnapshot {
    pub fn nothing_playing() -> Self {
        TrackSnapshot {
            track_id: None,
            name: NOT_AVAILABLE.to_string(),
            artist: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn playing<T: Into<String>>(track_id: T, name: T, artist: T) -> Self {
        TrackSnapshot {
            track_id: Some(track_id.into()),
            name: name.into(),
            artist: artist.into(),
        }
    }

    /// Blank track ids mean nothing is playing.
    pub fn normalized(mut self) -> Self {
        if self
            .track_id
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            self.track_id = None;
        }
        self
    }

    pub fn is_playing(&self) -> bool {
        self.track_id.is_some()
    }
}

impl Default for TrackSnapshot {
    fn default() -> Self {
        Self::nothing_playing()
    }
}

#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn poll(&self, user_id: usize) -> TrackSnapshot;
}
