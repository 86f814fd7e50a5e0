//! HTTP client for the Spotify accounts service and Web API.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::models::{CurrentlyPlaying, SpotifyProfile, TokenResponse};
use super::SpotifyError;
use crate::config::SpotifyConfig;

pub const SCOPES: &str = "user-read-playback-state user-read-currently-playing user-read-email";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SpotifyClient {
    client: reqwest::Client,
    config: SpotifyConfig,
    accounts_url: String,
    api_url: String,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig) -> Result<Self, SpotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        // Base urls are joined with absolute paths below
        let accounts_url = config.accounts_url.trim_end_matches('/').to_string();
        let api_url = config.api_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config,
            accounts_url,
            api_url,
        })
    }

    /// URL the user is sent to in order to grant access.
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
            self.accounts_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
        )
    }

    /// Exchanges the authorization code received on the redirect for a token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, SpotifyError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, SpotifyError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    pub async fn current_user(&self, access_token: &str) -> Result<SpotifyProfile, SpotifyError> {
        let response = self
            .client
            .get(format!("{}/v1/me", self.api_url))
            .bearer_auth(access_token)
            .send()
            .await?;
        decode(response).await
    }

    /// Ok(None) when the player is idle.
    pub async fn currently_playing(
        &self,
        access_token: &str,
    ) -> Result<Option<CurrentlyPlaying>, SpotifyError> {
        let response = self
            .client
            .get(format!("{}/v1/me/player/currently-playing", self.api_url))
            .bearer_auth(access_token)
            .send()
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, SpotifyError> {
        debug!("Requesting spotify token ({})", form[0].1);
        let response = self
            .client
            .post(format!("{}/api/token", self.accounts_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SpotifyError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SpotifyError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| SpotifyError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SpotifyClient {
        SpotifyClient::new(SpotifyConfig {
            client_id: "my client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:8888/callback".to_string(),
            accounts_url: "https://accounts.example.com/".to_string(),
            api_url: "https://api.example.com".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn authorize_url_encodes_parameters() {
        let url = client().authorize_url("xyz");

        assert!(url.starts_with("https://accounts.example.com/authorize?"));
        assert!(url.contains("client_id=my%20client"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8888%2Fcallback"));
        assert!(url.contains("scope=user-read-playback-state%20user-read-currently-playing%20user-read-email"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("response_type=code"));
    }
}
