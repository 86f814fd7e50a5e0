use super::auth::{AuthToken, AuthTokenValue};
use super::user_models::{SongEmotionRecord, SpotifyToken, User};
use anyhow::Result;

pub trait UserAuthTokenStore: Send + Sync {
    /// Returns a user's authentication token given an AuthTokenValue.
    /// Returns Ok(None) if the token does not exist.
    fn get_user_auth_token(&self, token: &AuthTokenValue) -> Result<Option<AuthToken>>;

    /// Deletes an auth token given the token value.
    /// Returns Ok(None) if the token does not exist.
    fn delete_user_auth_token(&self, token: &AuthTokenValue) -> Result<Option<AuthToken>>;

    /// Updates an auth token with the latest timestamp.
    fn update_user_auth_token_last_used_timestamp(&self, token: &AuthTokenValue) -> Result<()>;

    /// Adds a new auth token.
    fn add_user_auth_token(&self, token: AuthToken) -> Result<()>;
}

pub trait SpotifyTokenStore: Send + Sync {
    /// Returns the Spotify token pair stored for the user, if any.
    fn get_spotify_token(&self, user_id: usize) -> Result<Option<SpotifyToken>>;

    /// Stores the token pair, replacing any previous one for the user.
    fn set_spotify_token(&self, user_id: usize, token: &SpotifyToken) -> Result<()>;
}

pub trait SongEmotionStore: Send + Sync {
    /// Inserts the record, or overwrites name, artist and emotion of the existing
    /// row with the same (user_id, song_id).
    fn upsert_song_emotion(&self, record: &SongEmotionRecord) -> Result<()>;

    /// Returns every song emotion recorded for the user, most recently updated first.
    fn get_user_song_emotions(&self, user_id: usize) -> Result<Vec<SongEmotionRecord>>;
}

pub trait UserStore: UserAuthTokenStore + SpotifyTokenStore + SongEmotionStore + Send + Sync {
    /// Returns the id of the user with the given Spotify id, creating the user if needed.
    fn get_or_create_spotify_user(
        &self,
        spotify_id: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<usize>;

    /// Returns Ok(None) if the user does not exist.
    fn get_user(&self, user_id: usize) -> Result<Option<User>>;
}
