use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,

    // Feature configs
    pub spotify: Option<SpotifyFileConfig>,
    pub camera: Option<CameraFileConfig>,
    pub classifier: Option<ClassifierFileConfig>,
    pub tracking: Option<TrackingFileConfig>,
    pub persistence: Option<PersistenceFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SpotifyFileConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub accounts_url: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CameraFileConfig {
    /// Endpoint answering GET with a single JPEG snapshot.
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub fps: Option<u32>,
    pub idle_frame_interval_ms: Option<u64>,
    pub jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ClassifierFileConfig {
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub min_confidence: Option<f32>,
    pub max_consecutive_errors: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TrackingFileConfig {
    pub poll_interval_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PersistenceFileConfig {
    pub sink_timeout_ms: Option<u64>,
    /// "discard" or "retry_queue"
    pub on_failure: Option<String>,
    pub max_pending: Option<usize>,
    pub retry_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
