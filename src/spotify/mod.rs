//! Spotify login and playback lookups.

mod auth_state;
mod client;
pub mod models;

pub use auth_state::{AuthState, AuthStateStore};
pub use client::{SpotifyClient, SCOPES};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpotifyError {
    #[error("Spotify not configured")]
    NotConfigured,

    #[error("Spotify request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Spotify answered with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode Spotify response: {0}")]
    Decode(String),
}
