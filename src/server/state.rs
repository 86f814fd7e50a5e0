use axum::extract::FromRef;

use crate::camera::CameraManager;
use crate::emotion::EmotionAggregator;
use crate::spotify::{AuthStateStore, SpotifyClient};
use crate::stream::StreamDeps;
use crate::user::UserStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedUserStore = Arc<dyn UserStore>;
pub type OptionalSpotifyClient = Option<Arc<SpotifyClient>>;
pub type GuardedAuthStateStore = Arc<AuthStateStore>;
pub type GuardedCameraManager = Arc<CameraManager>;
pub type GuardedAggregator = Arc<EmotionAggregator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub user_store: GuardedUserStore,
    pub spotify_client: OptionalSpotifyClient,
    pub auth_state_store: GuardedAuthStateStore,
    pub stream: StreamDeps,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        user_store: GuardedUserStore,
        spotify_client: OptionalSpotifyClient,
        stream: StreamDeps,
    ) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            hash: env!("GIT_HASH").to_owned(),
            user_store,
            spotify_client,
            auth_state_store: Arc::new(AuthStateStore::new()),
            stream,
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedUserStore {
    fn from_ref(input: &ServerState) -> Self {
        input.user_store.clone()
    }
}

impl FromRef<ServerState> for OptionalSpotifyClient {
    fn from_ref(input: &ServerState) -> Self {
        input.spotify_client.clone()
    }
}

impl FromRef<ServerState> for GuardedAuthStateStore {
    fn from_ref(input: &ServerState) -> Self {
        input.auth_state_store.clone()
    }
}

impl FromRef<ServerState> for GuardedCameraManager {
    fn from_ref(input: &ServerState) -> Self {
        input.stream.camera.clone()
    }
}

impl FromRef<ServerState> for GuardedAggregator {
    fn from_ref(input: &ServerState) -> Self {
        input.stream.aggregator.clone()
    }
}

impl FromRef<ServerState> for StreamDeps {
    fn from_ref(input: &ServerState) -> Self {
        input.stream.clone()
    }
}
