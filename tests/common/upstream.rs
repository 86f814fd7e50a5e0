//! Fake upstream services
//!
//! One HTTP server standing in for everything moodtrack talks to: the Spotify accounts
//! service and Web API, the camera snapshot endpoint and the emotion classifier.
//! Tests script what is playing and which emotion the classifier sees.

use super::constants::*;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use moodtrack_server::camera::render;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Default)]
struct UpstreamState {
    track: Mutex<Option<(String, String, String)>>,
    emotion: Mutex<Option<String>>,
    grant_types: Mutex<Vec<String>>,
    classifier_down: AtomicBool,
}

pub struct FakeUpstream {
    pub base_url: String,
    state: Arc<UpstreamState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeUpstream {
    pub async fn spawn() -> Self {
        let state = Arc::new(UpstreamState::default());
        let app = Router::new()
            .route("/api/token", post(token))
            .route("/v1/me", get(profile))
            .route("/v1/me/player/currently-playing", get(currently_playing))
            .route("/camera/shot.jpg", get(snapshot))
            .route("/classify", post(classify))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake upstream");
        let port = listener.local_addr().expect("No local address").port();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake upstream failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn camera_url(&self) -> String {
        format!("{}/camera/shot.jpg", self.base_url)
    }

    pub fn classifier_url(&self) -> String {
        format!("{}/classify", self.base_url)
    }

    /// Sets what the fake Spotify player reports; None means the player is idle.
    pub fn play(&self, track: Option<(&str, &str, &str)>) {
        *self.state.track.lock().unwrap() = track.map(|(id, name, artist)| {
            (id.to_string(), name.to_string(), artist.to_string())
        });
    }

    /// Sets the emotion of the one face the classifier finds; None means no face.
    pub fn feel(&self, emotion: Option<&str>) {
        *self.state.emotion.lock().unwrap() = emotion.map(str::to_string);
    }

    pub fn set_classifier_down(&self, down: bool) {
        self.state.classifier_down.store(down, Ordering::SeqCst);
    }

    /// grant_type of every token request received so far.
    pub fn grant_types(&self) -> Vec<String> {
        self.state.grant_types.lock().unwrap().clone()
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn token(
    State(state): State<Arc<UpstreamState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let grant_type = form.get("grant_type").cloned().unwrap_or_default();
    state.grant_types.lock().unwrap().push(grant_type.clone());

    if grant_type == "authorization_code" && form.get("code").map(String::as_str) != Some(AUTH_CODE)
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response();
    }

    Json(json!({
        "access_token": ACCESS_TOKEN,
        "refresh_token": REFRESH_TOKEN,
        "expires_in": 3600,
    }))
    .into_response()
}

async fn profile() -> Response {
    Json(json!({
        "id": SPOTIFY_USER_ID,
        "email": SPOTIFY_EMAIL,
        "display_name": SPOTIFY_DISPLAY_NAME,
    }))
    .into_response()
}

async fn currently_playing(State(state): State<Arc<UpstreamState>>) -> Response {
    let track = state.track.lock().unwrap().clone();
    match track {
        Some((id, name, artist)) => Json(json!({
            "is_playing": true,
            "progress_ms": 1000,
            "item": {
                "id": id,
                "name": name,
                "artists": [{ "name": artist }],
            },
        }))
        .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn snapshot() -> Response {
    match render::encode_jpeg(&render::placeholder_frame().image, 70) {
        Ok(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn classify(State(state): State<Arc<UpstreamState>>, _frame: Bytes) -> Response {
    if state.classifier_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let emotion = state.emotion.lock().unwrap().clone();
    let faces = match emotion {
        Some(label) => json!([{
            "box": [200, 120, 160, 160],
            "emotions": { label: 0.9 },
        }]),
        None => json!([]),
    };
    Json(faces).into_response()
}
