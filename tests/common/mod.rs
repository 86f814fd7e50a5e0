//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TestClient};
//!
//! #[tokio::test]
//! async fn test_current_song() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::logged_in(&server).await;
//!
//!     let song = client.current_song().await;
//!     assert_eq!(song["song"], "N/A");
//! }
//! ```

mod client;
mod constants;
mod server;
mod upstream;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use client::{eventually, location, TestClient, VideoFeed};
pub use constants::*;
pub use server::TestServer;
