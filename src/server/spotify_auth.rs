//! Spotify login: `/login` -> Spotify consent -> `/callback` -> session cookie.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::session::{Session, COOKIE_SESSION_TOKEN_KEY};
use super::state::ServerState;
use crate::server::metrics;
use crate::spotify::{AuthState, SpotifyClient};
use crate::user::auth::{AuthToken, AuthTokenValue};
use crate::user::SpotifyToken;

const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

#[derive(Deserialize, Debug, Default)]
pub struct LoginParams {
    pub error: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn login_error_redirect(reason: &str) -> Response {
    Redirect::to(&format!("/login?error={}", urlencoding::encode(reason))).into_response()
}

async fn new_authorize_url(state: &ServerState, client: &SpotifyClient) -> String {
    state.auth_state_store.cleanup_expired().await;
    let auth_state = AuthState::generate();
    let url = client.authorize_url(&auth_state.csrf_token);
    state.auth_state_store.store(auth_state).await;
    url
}

pub async fn login(
    session: Option<Session>,
    State(state): State<ServerState>,
    Query(params): Query<LoginParams>,
) -> Response {
    if session.is_some() {
        return Redirect::to("/").into_response();
    }

    let Some(client) = state.spotify_client.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Spotify not configured." })),
        )
            .into_response();
    };

    let auth_url = new_authorize_url(&state, &client).await;

    // A failed attempt lands here again; answer instead of bouncing back to Spotify
    if let Some(reason) = params.error {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": reason, "auth_url": auth_url })),
        )
            .into_response();
    }

    Redirect::to(&auth_url).into_response()
}

pub async fn callback(State(state): State<ServerState>, Query(params): Query<CallbackParams>) -> Response {
    let Some(client) = state.spotify_client.clone() else {
        return login_error_redirect("spotify_not_configured");
    };

    if let Some(reason) = params.error {
        info!("Spotify login was denied: {}", reason);
        return login_error_redirect(&reason);
    }

    let valid_state = match params.state {
        Some(csrf_token) => state.auth_state_store.take(&csrf_token).await.is_some(),
        None => false,
    };
    if !valid_state {
        warn!("Spotify callback with unknown or expired state");
        return login_error_redirect("invalid_state");
    }

    let Some(code) = params.code else {
        return login_error_redirect("missing_code");
    };

    let tokens = match client.exchange_code(&code).await {
        Ok(tokens) => tokens,
        Err(err) => {
            error!("Spotify token exchange failed: {}", err);
            metrics::record_error("spotify_token_exchange", "/callback");
            return login_error_redirect("token_exchange_failed");
        }
    };

    let profile = match client.current_user(&tokens.access_token).await {
        Ok(profile) => profile,
        Err(err) => {
            error!("Failed to fetch Spotify profile: {}", err);
            metrics::record_error("spotify_profile", "/callback");
            return login_error_redirect("profile_fetch_failed");
        }
    };

    let user_id = match state.user_store.get_or_create_spotify_user(
        &profile.id,
        profile.email.as_deref(),
        profile.display_name.as_deref(),
    ) {
        Ok(user_id) => user_id,
        Err(err) => {
            error!("Failed to create user for spotify id {}: {}", profile.id, err);
            return login_error_redirect("user_creation_failed");
        }
    };

    let spotify_token = SpotifyToken::expiring_in(
        tokens.access_token,
        tokens.refresh_token.unwrap_or_default(),
        tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
    );
    if let Err(err) = state.user_store.set_spotify_token(user_id, &spotify_token) {
        // Login still succeeds; playback lookups will report nothing playing
        error!("Failed to store spotify token of user {}: {}", user_id, err);
    }

    let auth_token = AuthToken::new_for_user(user_id);
    let session_value = auth_token.value.0.clone();
    if let Err(err) = state.user_store.add_user_auth_token(auth_token) {
        error!("Failed to store session token of user {}: {}", user_id, err);
        return login_error_redirect("session_creation_failed");
    }

    info!("User {} logged in with Spotify", user_id);
    let cookie = Cookie::build((COOKIE_SESSION_TOKEN_KEY, session_value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    (
        [(header::SET_COOKIE, cookie.to_string())],
        Redirect::to("/"),
    )
        .into_response()
}

pub async fn logout(session: Option<Session>, State(state): State<ServerState>) -> Response {
    if let Some(session) = session {
        match state
            .user_store
            .delete_user_auth_token(&AuthTokenValue(session.token))
        {
            Ok(_) => debug!("User {} logged out", session.user_id),
            Err(err) => error!("Failed to delete session of user {}: {}", session.user_id, err),
        }
    }

    let cookie = Cookie::build((COOKIE_SESSION_TOKEN_KEY, ""))
        .path("/")
        .expires(time::OffsetDateTime::now_utc() - time::Duration::days(1)) // Expire it in the past
        .same_site(SameSite::Lax)
        .build();

    (
        [(header::SET_COOKIE, cookie.to_string())],
        Redirect::to("/login"),
    )
        .into_response()
}
