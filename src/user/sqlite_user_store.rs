use crate::sqlite_column;
use crate::sqlite_persistence::{
    open_versioned, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
    DEFAULT_TIMESTAMP,
};
use crate::user::*;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tracing::debug;

/// V 0
const USER_TABLE_V_0: Table = Table {
    name: "user",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "spotify_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("email", &SqlType::Text),
        sqlite_column!("display_name", &SqlType::Text),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    unique_constraints: &[],
    indices: &[("idx_user_spotify_id", "spotify_id")],
};
const AUTH_TOKEN_TABLE_V_0: Table = Table {
    name: "auth_token",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "user",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("value", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("last_used", &SqlType::Integer),
    ],
    unique_constraints: &[],
    indices: &[("idx_auth_token_value", "value")],
};
const SPOTIFY_TOKEN_TABLE_V_0: Table = Table {
    name: "spotify_token",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            is_unique = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "user",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("access_token", &SqlType::Text, non_null = true),
        sqlite_column!("refresh_token", &SqlType::Text, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    unique_constraints: &[],
    indices: &[],
};

/// V 1
const SONG_EMOTION_TABLE_V_1: Table = Table {
    name: "song_emotion",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "user",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("song_id", &SqlType::Text, non_null = true),
        sqlite_column!("song_name", &SqlType::Text, non_null = true),
        sqlite_column!("artist_name", &SqlType::Text, non_null = true),
        sqlite_column!("emotion", &SqlType::Text, non_null = true),
        sqlite_column!(
            "updated",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    unique_constraints: &[&["user_id", "song_id"]],
    indices: &[("idx_song_emotion_user_id", "user_id")],
};

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[USER_TABLE_V_0, AUTH_TOKEN_TABLE_V_0, SPOTIFY_TOKEN_TABLE_V_0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            USER_TABLE_V_0,
            AUTH_TOKEN_TABLE_V_0,
            SPOTIFY_TOKEN_TABLE_V_0,
            SONG_EMOTION_TABLE_V_1,
        ],
        migration: Some(|conn: &Connection| {
            SONG_EMOTION_TABLE_V_1.create(conn)?;
            Ok(())
        }),
    },
];

fn system_time_from_column_result(value: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(value.max(0) as u64)
}

fn system_time_to_column(value: SystemTime) -> i64 {
    value
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Clone)]
pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), VERSIONED_SCHEMAS).with_context(|| {
            format!("Failed to open user db at {}", db_path.as_ref().display())
        })?;
        Ok(SqliteUserStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl UserStore for SqliteUserStore {
    fn get_or_create_spotify_user(
        &self,
        spotify_id: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<usize> = conn
            .query_row(
                "SELECT id FROM user WHERE spotify_id = ?1",
                params![spotify_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(user_id) = existing {
            return Ok(user_id);
        }

        conn.execute(
            "INSERT INTO user (spotify_id, email, display_name) VALUES (?1, ?2, ?3)",
            params![spotify_id, email, display_name],
        )
        .with_context(|| format!("Failed to create user {}", spotify_id))?;
        let user_id = conn.last_insert_rowid() as usize;
        debug!("Created user {} for spotify id {}", user_id, spotify_id);
        Ok(user_id)
    }

    fn get_user(&self, user_id: usize) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, spotify_id, email, display_name, created FROM user WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        spotify_id: row.get(1)?,
                        email: row.get(2)?,
                        display_name: row.get(3)?,
                        created: system_time_from_column_result(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}

impl UserAuthTokenStore for SqliteUserStore {
    fn get_user_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>> {
        let conn = self.conn.lock().unwrap();
        let token = conn
            .query_row(
                "SELECT user_id, value, created, last_used FROM auth_token WHERE value = ?1",
                params![value.0],
                |row| {
                    Ok(AuthToken {
                        user_id: row.get(0)?,
                        value: AuthTokenValue(row.get(1)?),
                        created: system_time_from_column_result(row.get(2)?),
                        last_used: row
                            .get::<usize, Option<i64>>(3)?
                            .map(system_time_from_column_result),
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    fn delete_user_auth_token(&self, token: &AuthTokenValue) -> Result<Option<AuthToken>> {
        let token = match self.get_user_auth_token(token)? {
            Some(token) => token,
            None => return Ok(None),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM auth_token WHERE value = ?1",
            params![token.value.0],
        )?;
        Ok(Some(token))
    }

    fn update_user_auth_token_last_used_timestamp(&self, token: &AuthTokenValue) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "UPDATE auth_token SET last_used = {} WHERE value = ?1",
                DEFAULT_TIMESTAMP
            ),
            params![token.0],
        )?;
        Ok(())
    }

    fn add_user_auth_token(&self, token: AuthToken) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auth_token (value, user_id, created) VALUES (?1, ?2, ?3)",
            params![
                token.value.0,
                token.user_id,
                system_time_to_column(token.created)
            ],
        )?;
        Ok(())
    }
}

impl SpotifyTokenStore for SqliteUserStore {
    fn get_spotify_token(&self, user_id: usize) -> Result<Option<SpotifyToken>> {
        let conn = self.conn.lock().unwrap();
        let token = conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at FROM spotify_token WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(SpotifyToken {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                        expires_at: system_time_from_column_result(row.get(2)?),
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    fn set_spotify_token(&self, user_id: usize, token: &SpotifyToken) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO spotify_token (user_id, access_token, refresh_token, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at",
            params![
                user_id,
                token.access_token,
                token.refresh_token,
                system_time_to_column(token.expires_at)
            ],
        )
        .with_context(|| format!("Failed to store spotify token for user {}", user_id))?;
        Ok(())
    }
}

impl SongEmotionStore for SqliteUserStore {
    fn upsert_song_emotion(&self, record: &SongEmotionRecord) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM song_emotion WHERE user_id = ?1 AND song_id = ?2",
                params![record.user_id, record.song_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(row_id) => {
                tx.execute(
                    &format!(
                        "UPDATE song_emotion SET song_name = ?1, artist_name = ?2, emotion = ?3, updated = {} WHERE id = ?4",
                        DEFAULT_TIMESTAMP
                    ),
                    params![record.song_name, record.artist_name, record.emotion, row_id],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO song_emotion (user_id, song_id, song_name, artist_name, emotion)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.user_id,
                        record.song_id,
                        record.song_name,
                        record.artist_name,
                        record.emotion
                    ],
                )?;
            }
        }
        tx.commit().with_context(|| {
            format!(
                "Failed to upsert song emotion for user {} song {}",
                record.user_id, record.song_id
            )
        })?;
        Ok(())
    }

    fn get_user_song_emotions(&self, user_id: usize) -> Result<Vec<SongEmotionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id, song_id, song_name, artist_name, emotion FROM song_emotion
             WHERE user_id = ?1 ORDER BY updated DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(SongEmotionRecord {
                    user_id: row.get(0)?,
                    song_id: row.get(1)?,
                    song_name: row.get(2)?,
                    artist_name: row.get(3)?,
                    emotion: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
