use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{info, warn};

use super::session::Session;
use super::state::{GuardedCameraManager, ServerState};
use crate::stream::{StreamDeps, StreamLoop, MJPEG_BOUNDARY};

pub async fn toggle_camera(State(camera): State<GuardedCameraManager>) -> Response {
    match camera.toggle().await {
        Ok(active) => {
            info!("Camera is now {}", if active { "on" } else { "off" });
            Json(json!({ "status": "success", "camera_active": active })).into_response()
        }
        Err(err) => {
            warn!("Camera toggle failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": err.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn video_feed(session: Option<Session>, State(deps): State<StreamDeps>) -> Response {
    let stream = StreamLoop::new(session.map(|s| s.user_id), deps);
    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(stream.into_mjpeg_stream()),
    )
        .into_response()
}

pub async fn stream_status(session: Session, State(state): State<ServerState>) -> Response {
    let status = state.stream.statuses.get(session.user_id).unwrap_or_default();
    Json(status).into_response()
}
