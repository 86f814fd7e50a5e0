use anyhow::{Context, Result};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use axum::{
    extract::State,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::services::ServeDir;

use super::session::Session;
use super::spotify_auth::{callback, login, logout};
use super::state::*;
use super::stream_routes::{stream_status, toggle_camera, video_feed};
use super::{log_requests, metrics, ServerConfig};
use crate::stream::StreamDeps;
use crate::tracking::{TrackSnapshot, NOT_AVAILABLE};
use crate::user::User;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub user: Option<User>,
    pub spotify_configured: bool,
    pub camera_active: bool,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Serialize, Debug, PartialEq)]
struct CurrentSong {
    song: String,
    artist: String,
    id: Option<String>,
}

impl From<TrackSnapshot> for CurrentSong {
    fn from(snapshot: TrackSnapshot) -> Self {
        CurrentSong {
            song: snapshot.name,
            artist: snapshot.artist,
            id: snapshot.track_id,
        }
    }
}

#[derive(Serialize)]
struct DashboardRow {
    song_name: String,
    artist_name: String,
    emotion: String,
    song_id: String,
}

async fn home(session: Option<Session>, State(state): State<ServerState>) -> impl IntoResponse {
    let user = session.and_then(|s| match state.user_store.get_user(s.user_id) {
        Ok(user) => user,
        Err(err) => {
            warn!("Failed to load user {}: {}", s.user_id, err);
            None
        }
    });
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        user,
        spotify_configured: state.spotify_client.is_some(),
        camera_active: state.stream.camera.is_active(),
    };
    Json(stats)
}

async fn current_song(session: Session, State(deps): State<StreamDeps>) -> Response {
    let snapshot = tokio::time::timeout(deps.config.poll_timeout, deps.tracks.poll(session.user_id))
        .await
        .unwrap_or_else(|_| {
            metrics::record_track_poll_timeout();
            TrackSnapshot::nothing_playing()
        });
    Json(CurrentSong::from(snapshot)).into_response()
}

async fn dashboard(session: Option<Session>, State(user_store): State<GuardedUserStore>) -> Response {
    let Some(session) = session else {
        return Redirect::to("/login").into_response();
    };

    let rows: Vec<DashboardRow> = match user_store.get_user_song_emotions(session.user_id) {
        Ok(records) => records
            .into_iter()
            .map(|r| DashboardRow {
                song_name: r.song_name,
                artist_name: r.artist_name,
                emotion: r.emotion,
                song_id: r.song_id,
            })
            .collect(),
        Err(err) => {
            error!("Failed to fetch song emotions of user {}: {}", session.user_id, err);
            metrics::record_error("song_emotion_query", "/dashboard");
            Vec::new()
        }
    };
    Json(rows).into_response()
}

pub fn make_app(
    config: ServerConfig,
    user_store: GuardedUserStore,
    spotify_client: OptionalSpotifyClient,
    stream: StreamDeps,
) -> Result<Router> {
    let state = ServerState::new(config.clone(), user_store, spotify_client, stream);

    let auth_routes: Router = Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", get(logout))
        .with_state(state.clone());

    let stream_routes: Router = Router::new()
        .route("/camera/toggle", post(toggle_camera))
        .route("/video_feed", get(video_feed))
        .route("/stream/status", get(stream_status))
        .with_state(state.clone());

    let user_routes: Router = Router::new()
        .route("/current_song", get(current_song))
        .route("/dashboard", get(dashboard))
        .with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let app: Router = home_router
        .merge(auth_routes)
        .merge(stream_routes)
        .merge(user_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

/// Serves the app until `shutdown` is cancelled, then finalizes every active song.
pub async fn run_server(
    config: ServerConfig,
    user_store: GuardedUserStore,
    spotify_client: OptionalSpotifyClient,
    stream: StreamDeps,
    shutdown: CancellationToken,
) -> Result<()> {
    let aggregator = stream.aggregator.clone();
    let camera = stream.camera.clone();
    let app = make_app(config.clone(), user_store, spotify_client, stream)?;

    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", config.metrics_port))?;
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let result = axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(metrics_shutdown.cancelled_owned())
            .await;
        if let Err(err) = result {
            error!("Metrics server failed: {}", err);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    info!("HTTP server stopped, finalizing active songs");
    shutdown.cancel();
    camera.shutdown().await;
    aggregator.flush_all().await;

    Ok(result?)
}
