use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import modules from the library crate
use moodtrack_server::camera::{CameraManager, SnapshotFrameSource};
use moodtrack_server::config;
use moodtrack_server::emotion::{EmotionAggregator, HttpEmotionClassifier, StoreEmotionSink};
use moodtrack_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use moodtrack_server::spotify::SpotifyClient;
use moodtrack_server::stream::{StreamDeps, StreamStatusBoard};
use moodtrack_server::tracking::{CachedTrackSource, SpotifyTrackSource, TrackSnapshot, TrackSource};
use moodtrack_server::user::SqliteUserStore;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding moodtrack.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8888)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// URL answering GET with a JPEG snapshot of the camera.
    #[clap(long)]
    pub camera_url: Option<String>,

    /// URL of the emotion classifier service.
    #[clap(long)]
    pub classifier_url: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            frontend_dir_path: args.frontend_dir_path.clone(),
            camera_url: args.camera_url.clone(),
            classifier_url: args.classifier_url.clone(),
        }
    }
}

/// Track source used when Spotify credentials are missing: nobody is ever playing.
struct NoTrackSource;

#[async_trait::async_trait]
impl TrackSource for NoTrackSource {
    async fn poll(&self, _user_id: usize) -> TrackSnapshot {
        TrackSnapshot::nothing_playing()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!("  camera: {}", app_config.camera.url);
    info!("  classifier: {}", app_config.classifier.url);
    info!("  sink failure policy: {:?}", app_config.persistence.failure_policy);

    info!("Initializing metrics...");
    metrics::init_metrics();

    if !app_config.db_path().exists() {
        info!("Creating new database at {:?}", app_config.db_path());
    }
    let user_store = Arc::new(SqliteUserStore::new(app_config.db_path())?);

    let spotify_client = match app_config.spotify.clone() {
        Some(spotify_config) => Some(Arc::new(SpotifyClient::new(spotify_config)?)),
        None => {
            warn!("Spotify is not configured, song tracking is disabled");
            None
        }
    };

    let tracks: Arc<dyn TrackSource> = match &spotify_client {
        Some(client) => Arc::new(CachedTrackSource::new(
            Arc::new(SpotifyTrackSource::new(client.clone(), user_store.clone())),
            app_config.tracking.poll_interval,
        )),
        None => Arc::new(NoTrackSource),
    };

    let aggregator = Arc::new(EmotionAggregator::new(
        Arc::new(StoreEmotionSink::new(user_store.clone())),
        app_config.aggregator_config(),
    ));

    let frame_source = Arc::new(SnapshotFrameSource::new(
        app_config.camera.url.clone(),
        app_config.camera.timeout,
    )?);
    let classifier = Arc::new(HttpEmotionClassifier::new(
        app_config.classifier.url.clone(),
        app_config.classifier.timeout,
        app_config.classifier.min_confidence,
    )?);

    let stream = StreamDeps {
        camera: Arc::new(CameraManager::new(frame_source, aggregator.clone())),
        classifier,
        tracks,
        aggregator: aggregator.clone(),
        statuses: Arc::new(StreamStatusBoard::default()),
        config: app_config.stream_config(),
    };

    let shutdown_token = CancellationToken::new();
    let retry_task =
        aggregator.spawn_retry_task(app_config.persistence.retry_interval, shutdown_token.clone());

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
        frontend_dir_path: app_config.frontend_dir_path.clone(),
    };

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        signal_token.cancel();
    });

    let result = run_server(
        server_config,
        user_store,
        spotify_client,
        stream,
        shutdown_token.clone(),
    )
    .await;
    info!("HTTP server stopped: {:?}", result);

    shutdown_token.cancel();
    if let Some(task) = retry_task {
        let _ = task.await;
    }
    // Records that are still pending are lost with the process
    if aggregator.pending_count() > 0 {
        warn!(
            "Exiting with {} song emotion records not persisted",
            aggregator.pending_count()
        );
    }

    result
}
