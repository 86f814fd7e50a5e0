//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own database, wired to its own
//! [`FakeUpstream`] through the real Spotify, camera and classifier clients.

use super::constants::*;
use super::upstream::FakeUpstream;
use moodtrack_server::camera::{CameraManager, SnapshotFrameSource};
use moodtrack_server::config::SpotifyConfig;
use moodtrack_server::emotion::{
    AggregatorConfig, EmotionAggregator, HttpEmotionClassifier, SinkFailurePolicy,
    StoreEmotionSink,
};
use moodtrack_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use moodtrack_server::spotify::SpotifyClient;
use moodtrack_server::stream::{StreamConfig, StreamDeps, StreamStatusBoard};
use moodtrack_server::tracking::{CachedTrackSource, SpotifyTrackSource};
use moodtrack_server::user::SqliteUserStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with isolated database and upstream services
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Scriptable Spotify, camera and classifier
    pub upstream: FakeUpstream,

    /// User store for direct database access in tests
    pub user_store: Arc<SqliteUserStore>,

    pub aggregator: Arc<EmotionAggregator>,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created, the port cannot be bound or the
    /// server doesn't become ready within timeout.
    pub async fn spawn() -> Self {
        let upstream = FakeUpstream::spawn().await;

        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");
        let user_store = Arc::new(
            SqliteUserStore::new(temp_db_dir.path().join("moodtrack.db"))
                .expect("Failed to open user store"),
        );

        let spotify_client = Arc::new(
            SpotifyClient::new(SpotifyConfig {
                client_id: "test-client".to_string(),
                client_secret: "test-secret".to_string(),
                redirect_uri: "http://127.0.0.1/callback".to_string(),
                accounts_url: upstream.base_url.clone(),
                api_url: upstream.base_url.clone(),
            })
            .expect("Failed to create spotify client"),
        );

        let aggregator = Arc::new(EmotionAggregator::new(
            Arc::new(StoreEmotionSink::new(user_store.clone())),
            AggregatorConfig {
                sink_timeout: Duration::from_secs(2),
                failure_policy: SinkFailurePolicy::Discard,
            },
        ));

        let frame_source = Arc::new(
            SnapshotFrameSource::new(upstream.camera_url(), Duration::from_secs(2))
                .expect("Failed to create frame source"),
        );
        let classifier = Arc::new(
            HttpEmotionClassifier::new(upstream.classifier_url(), Duration::from_secs(2), 0.0)
                .expect("Failed to create classifier"),
        );
        let tracks = Arc::new(CachedTrackSource::new(
            Arc::new(SpotifyTrackSource::new(
                spotify_client.clone(),
                user_store.clone(),
            )),
            Duration::from_millis(20),
        ));

        let stream = StreamDeps {
            camera: Arc::new(CameraManager::new(frame_source, aggregator.clone())),
            classifier,
            tracks,
            aggregator: aggregator.clone(),
            statuses: Arc::new(StreamStatusBoard::default()),
            config: StreamConfig {
                fps: 50,
                idle_frame_interval: Duration::from_millis(20),
                poll_timeout: Duration::from_secs(1),
                max_consecutive_classifier_errors: 5,
                jpeg_quality: 70,
            },
        };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            metrics_port: 0,
            requests_logging_level: RequestsLoggingLevel::None,
            frontend_dir_path: None,
        };
        let app = make_app(config, user_store.clone(), Some(spotify_client), stream)
            .expect("Failed to build app");

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            upstream,
            user_store,
            aggregator,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the / endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
