mod file_config;

pub use file_config::{
    CameraFileConfig, ClassifierFileConfig, FileConfig, PersistenceFileConfig, SpotifyFileConfig,
    TrackingFileConfig,
};

use crate::emotion::{AggregatorConfig, SinkFailurePolicy};
use crate::server::RequestsLoggingLevel;
use crate::stream::StreamConfig;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SPOTIFY_ACCOUNTS_URL: &str = "https://accounts.spotify.com";
pub const DEFAULT_SPOTIFY_API_URL: &str = "https://api.spotify.com";
pub const DEFAULT_CAMERA_URL: &str = "http://127.0.0.1:8080/shot.jpg";
pub const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:5000/classify";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub camera_url: Option<String>,
    pub classifier_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,

    /// None when client id, secret or redirect uri is missing.
    pub spotify: Option<SpotifyConfig>,

    // Feature configs (with defaults)
    pub camera: CameraSettings,
    pub classifier: ClassifierSettings,
    pub tracking: TrackingSettings,
    pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub accounts_url: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub timeout: Duration,
    pub fps: u32,
    pub idle_frame_interval: Duration,
    pub jpeg_quality: u8,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CAMERA_URL.to_string(),
            timeout: Duration::from_millis(5000),
            fps: 15,
            idle_frame_interval: Duration::from_millis(200),
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub url: String,
    pub timeout: Duration,
    pub min_confidence: f32,
    pub max_consecutive_errors: u32,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CLASSIFIER_URL.to_string(),
            timeout: Duration::from_millis(5000),
            min_confidence: 0.0,
            max_consecutive_errors: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            poll_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub sink_timeout: Duration,
    pub failure_policy: SinkFailurePolicy,
    pub retry_interval: Duration,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            sink_timeout: Duration::from_millis(5000),
            failure_policy: SinkFailurePolicy::Discard,
            retry_interval: Duration::from_secs(30),
        }
    }
}

const DEFAULT_MAX_PENDING: usize = 256;

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        Self::resolve_with_env(cli, file_config, |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::resolve`], reading environment variables through `env`.
    pub fn resolve_with_env<F>(cli: &CliConfig, file_config: Option<FileConfig>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let spotify = resolve_spotify(file.spotify.unwrap_or_default(), &env);

        let camera_file = file.camera.unwrap_or_default();
        let camera_defaults = CameraSettings::default();
        let camera = CameraSettings {
            url: camera_file
                .url
                .or_else(|| cli.camera_url.clone())
                .unwrap_or(camera_defaults.url),
            timeout: camera_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(camera_defaults.timeout),
            fps: camera_file.fps.unwrap_or(camera_defaults.fps),
            idle_frame_interval: camera_file
                .idle_frame_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(camera_defaults.idle_frame_interval),
            jpeg_quality: camera_file
                .jpeg_quality
                .unwrap_or(camera_defaults.jpeg_quality),
        };
        if camera.fps == 0 {
            bail!("camera.fps must be greater than 0");
        }
        if camera.jpeg_quality == 0 || camera.jpeg_quality > 100 {
            bail!("camera.jpeg_quality must be between 1 and 100");
        }

        let classifier_file = file.classifier.unwrap_or_default();
        let classifier_defaults = ClassifierSettings::default();
        let classifier = ClassifierSettings {
            url: classifier_file
                .url
                .or_else(|| cli.classifier_url.clone())
                .unwrap_or(classifier_defaults.url),
            timeout: classifier_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(classifier_defaults.timeout),
            min_confidence: classifier_file
                .min_confidence
                .unwrap_or(classifier_defaults.min_confidence),
            max_consecutive_errors: classifier_file
                .max_consecutive_errors
                .unwrap_or(classifier_defaults.max_consecutive_errors),
        };

        let tracking_file = file.tracking.unwrap_or_default();
        let tracking_defaults = TrackingSettings::default();
        let tracking = TrackingSettings {
            poll_interval: tracking_file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(tracking_defaults.poll_interval),
            poll_timeout: tracking_file
                .poll_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(tracking_defaults.poll_timeout),
        };

        let persistence_file = file.persistence.unwrap_or_default();
        let persistence_defaults = PersistenceSettings::default();
        let max_pending = persistence_file.max_pending.unwrap_or(DEFAULT_MAX_PENDING);
        let failure_policy = match persistence_file.on_failure.as_deref() {
            None => persistence_defaults.failure_policy,
            Some(value) => parse_failure_policy(value, max_pending)?,
        };
        let persistence = PersistenceSettings {
            sink_timeout: persistence_file
                .sink_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(persistence_defaults.sink_timeout),
            failure_policy,
            retry_interval: persistence_file
                .retry_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(persistence_defaults.retry_interval),
        };

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            frontend_dir_path,
            spotify,
            camera,
            classifier,
            tracking,
            persistence,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir.join("moodtrack.db")
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            sink_timeout: self.persistence.sink_timeout,
            failure_policy: self.persistence.failure_policy,
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            fps: self.camera.fps,
            idle_frame_interval: self.camera.idle_frame_interval,
            poll_timeout: self.tracking.poll_timeout,
            max_consecutive_classifier_errors: self.classifier.max_consecutive_errors,
            jpeg_quality: self.camera.jpeg_quality,
        }
    }
}

/// Each credential comes from the TOML file, then `SPOTIFY_*`, then the legacy `SPOTIPY_*`
/// variables.
fn resolve_spotify<F>(file: SpotifyFileConfig, env: &F) -> Option<SpotifyConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |value: Option<String>, name: &str| {
        value
            .or_else(|| env(&format!("SPOTIFY_{}", name)))
            .or_else(|| env(&format!("SPOTIPY_{}", name)))
            .filter(|v| !v.trim().is_empty())
    };

    let client_id = lookup(file.client_id, "CLIENT_ID")?;
    let client_secret = lookup(file.client_secret, "CLIENT_SECRET")?;
    let redirect_uri = lookup(file.redirect_uri, "REDIRECT_URI")?;

    Some(SpotifyConfig {
        client_id,
        client_secret,
        redirect_uri,
        accounts_url: file
            .accounts_url
            .unwrap_or_else(|| DEFAULT_SPOTIFY_ACCOUNTS_URL.to_string()),
        api_url: file
            .api_url
            .unwrap_or_else(|| DEFAULT_SPOTIFY_API_URL.to_string()),
    })
}

fn parse_failure_policy(value: &str, max_pending: usize) -> Result<SinkFailurePolicy> {
    match value.to_ascii_lowercase().as_str() {
        "discard" => Ok(SinkFailurePolicy::Discard),
        "retry_queue" => Ok(SinkFailurePolicy::RetryQueue { max_pending }),
        other => bail!(
            "Unknown persistence.on_failure value {:?}, expected \"discard\" or \"retry_queue\"",
            other
        ),
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
