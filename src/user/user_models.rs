//! User data models

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: usize,
    pub spotify_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created: SystemTime,
}

/// OAuth token pair granted by Spotify for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: SystemTime,
}

impl SpotifyToken {
    pub fn expiring_in(access_token: String, refresh_token: String, expires_in_secs: u64) -> Self {
        SpotifyToken {
            access_token,
            refresh_token,
            expires_at: SystemTime::now() + Duration::from_secs(expires_in_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }
}

/// The majority emotion recorded for one (user, song) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongEmotionRecord {
    pub user_id: usize,
    pub song_id: String,
    pub song_name: String,
    pub artist_name: String,
    pub emotion: String,
}
