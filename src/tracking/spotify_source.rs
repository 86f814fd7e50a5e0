use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{TrackSnapshot, TrackSource, NOT_AVAILABLE};
use crate::spotify::models::CurrentlyPlaying;
use crate::spotify::SpotifyClient;
use crate::user::{SpotifyToken, SpotifyTokenStore};

const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Reads the user's Spotify player, refreshing the stored token when it expired.
pub struct SpotifyTrackSource {
    client: Arc<SpotifyClient>,
    tokens: Arc<dyn SpotifyTokenStore>,
}

impl SpotifyTrackSource {
    pub fn new(client: Arc<SpotifyClient>, tokens: Arc<dyn SpotifyTokenStore>) -> Self {
        Self { client, tokens }
    }

    /// A valid access token for the user, or None when the user never connected Spotify.
    async fn access_token(&self, user_id: usize) -> Result<Option<String>> {
        let Some(token) = self.tokens.get_spotify_token(user_id)? else {
            return Ok(None);
        };
        if !token.is_expired() {
            return Ok(Some(token.access_token));
        }

        debug!("Refreshing spotify token of user {}", user_id);
        let refreshed = self
            .client
            .refresh_token(&token.refresh_token)
            .await
            .context("Failed to refresh spotify token")?;
        let token = SpotifyToken::expiring_in(
            refreshed.access_token,
            refreshed.refresh_token.unwrap_or(token.refresh_token),
            refreshed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        );
        self.tokens.set_spotify_token(user_id, &token)?;
        Ok(Some(token.access_token))
    }

    async fn try_poll(&self, user_id: usize) -> Result<TrackSnapshot> {
        let Some(access_token) = self.access_token(user_id).await? else {
            return Ok(TrackSnapshot::nothing_playing());
        };
        let playing = self
            .client
            .currently_playing(&access_token)
            .await
            .context("Failed to fetch currently playing track")?;
        Ok(snapshot_of(playing))
    }
}

fn snapshot_of(playing: Option<CurrentlyPlaying>) -> TrackSnapshot {
    let Some(playing) = playing else {
        return TrackSnapshot::nothing_playing();
    };
    let item = match playing.item {
        Some(item) if playing.is_playing => item,
        _ => return TrackSnapshot::nothing_playing(),
    };
    let artist = item
        .artists
        .into_iter()
        .next()
        .and_then(|a| a.name)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    TrackSnapshot {
        track_id: item.id,
        name: item.name.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        artist,
    }
    .normalized()
}

#[async_trait]
impl TrackSource for SpotifyTrackSource {
    async fn poll(&self, user_id: usize) -> TrackSnapshot {
        match self.try_poll(user_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("Could not read playback of user {}: {:#}", user_id, err);
                TrackSnapshot::nothing_playing()
            }
        }
    }
}
