//! Moodtrack Server Library
//!
//! Correlates the emotion seen on camera with the song the user is listening to on
//! Spotify. This library exposes the internal modules for testing and reuse.

pub mod camera;
pub mod config;
pub mod emotion;
pub mod server;
pub mod spotify;
pub mod sqlite_persistence;
pub mod stream;
pub mod tracking;
pub mod user;

// Re-export commonly used types for convenience
pub use emotion::{EmotionAggregator, EmotionSink};
pub use server::{run_server, RequestsLoggingLevel};
pub use user::{SqliteUserStore, UserStore};
