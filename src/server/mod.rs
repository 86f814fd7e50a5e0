pub mod config;
mod http_layers;
pub mod metrics;
pub mod server;
pub(self) mod session;
pub(self) mod spotify_auth;
pub mod state;
pub(self) mod stream_routes;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
