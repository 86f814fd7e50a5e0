use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all moodtrack metrics
const PREFIX: &str = "moodtrack";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Stream Metrics
    pub static ref FRAMES_PROCESSED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_frames_processed_total"),
        "Total camera frames run through the stream loop"
    ).expect("Failed to create frames_processed_total metric");

    pub static ref EMOTIONS_OBSERVED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_emotions_observed_total"), "Detected emotions by label"),
        &["emotion"]
    ).expect("Failed to create emotions_observed_total metric");

    pub static ref CLASSIFIER_ERRORS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_classifier_errors_total"),
        "Total emotion classifier failures"
    ).expect("Failed to create classifier_errors_total metric");

    pub static ref TRACK_POLL_TIMEOUTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_track_poll_timeouts_total"),
        "Track source polls that did not answer in time"
    ).expect("Failed to create track_poll_timeouts_total metric");

    // Song emotion persistence Metrics
    pub static ref SONG_FINALIZATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_song_finalizations_total"), "Song finalizations by outcome"),
        &["outcome"]
    ).expect("Failed to create song_finalizations_total metric");

    pub static ref SINK_PENDING_RECORDS: Gauge = Gauge::new(
        format!("{PREFIX}_sink_pending_records"),
        "Song emotion records waiting to be retried"
    ).expect("Failed to create sink_pending_records metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(FRAMES_PROCESSED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EMOTIONS_OBSERVED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CLASSIFIER_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TRACK_POLL_TIMEOUTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SONG_FINALIZATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SINK_PENDING_RECORDS.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record one frame going through the stream loop
pub fn record_frame_processed(emotion: Option<&str>) {
    FRAMES_PROCESSED_TOTAL.inc();
    if let Some(emotion) = emotion {
        EMOTIONS_OBSERVED_TOTAL.with_label_values(&[emotion]).inc();
    }
}

pub fn record_classifier_error() {
    CLASSIFIER_ERRORS_TOTAL.inc();
}

pub fn record_track_poll_timeout() {
    TRACK_POLL_TIMEOUTS_TOTAL.inc();
}

/// Record the outcome of finalizing a song: persisted, failed, empty or queued
pub fn record_song_finalization(outcome: &str) {
    SONG_FINALIZATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn set_sink_pending_records(count: usize) {
    SINK_PENDING_RECORDS.set(count as f64);
}

/// Record an error
pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
