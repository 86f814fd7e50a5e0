//! Shared constants for end-to-end tests
//!
//! When fake upstream data changes (Spotify profile, tokens, tracks),
//! update only this file.

// ============================================================================
// Fake Spotify account
// ============================================================================

/// Spotify id returned by the fake profile endpoint
pub const SPOTIFY_USER_ID: &str = "spotify-listener-1";

/// Display name returned by the fake profile endpoint
pub const SPOTIFY_DISPLAY_NAME: &str = "Test Listener";

/// Email returned by the fake profile endpoint
pub const SPOTIFY_EMAIL: &str = "listener@example.com";

/// Access token handed out by the fake token endpoint
pub const ACCESS_TOKEN: &str = "fake-access-token";

/// Refresh token handed out by the fake token endpoint
pub const REFRESH_TOKEN: &str = "fake-refresh-token";

/// Authorization code the tests pass to /callback
pub const AUTH_CODE: &str = "fake-auth-code";

// ============================================================================
// Fake tracks: (id, name, artist)
// ============================================================================

pub const TRACK_A: (&str, &str, &str) = ("track-a", "Opening Song", "The Test Band");

pub const TRACK_B: (&str, &str, &str) = ("track-b", "Closing Song", "Jazz Ensemble");

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for a server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness checks
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Maximum time to wait for an asynchronous effect (a row being written, a frame arriving)
pub const EVENTUALLY_TIMEOUT_MS: u64 = 5000;
