use std::collections::HashMap;

use rand::Rng;
use rand_distr::Alphanumeric;
use tokio::sync::RwLock;

/// Seconds a login attempt may take between /login and /callback.
const STATE_TTL_SECS: i64 = 300;

/// CSRF state handed to Spotify on /login and checked on /callback.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub csrf_token: String,
    pub created_at: i64,
}

impl AuthState {
    pub fn generate() -> Self {
        let csrf_token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        AuthState {
            csrf_token,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// In-memory pending login attempts, keyed by CSRF token.
#[derive(Default)]
pub struct AuthStateStore {
    states: RwLock<HashMap<String, AuthState>>,
}

impl AuthStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store(&self, state: AuthState) {
        let mut states = self.states.write().await;
        states.insert(state.csrf_token.clone(), state);
    }

    /// Removes and returns the state if it exists and has not expired.
    pub async fn take(&self, csrf_token: &str) -> Option<AuthState> {
        let now = chrono::Utc::now().timestamp();
        let mut states = self.states.write().await;
        states
            .remove(csrf_token)
            .filter(|state| now - state.created_at < STATE_TTL_SECS)
    }

    pub async fn cleanup_expired(&self) {
        let now = chrono::Utc::now().timestamp();
        let mut states = self.states.write().await;
        states.retain(|_, state| now - state.created_at < STATE_TTL_SECS);
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}
