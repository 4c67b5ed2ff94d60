//! Multi-user token registry.
//!
//! Server deployments hold tokens for many users at once; the platform
//! keychain is single-desktop by nature, so these go into a SQLite table
//! instead. One row per user, upserts preserve `created_at`, and validity
//! is computed with the same expiry buffer as the single-user store.
//!
//! [`RegistryTokenProvider`] adapts one registry row to the
//! [`AccessTokenProvider`] seam so a [`GraphClient`](crate::graph::GraphClient)
//! can issue real calls on behalf of a registered user.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mailhelm_common::auth::types::valid_at;
use mailhelm_common::TokenRecord;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use tracing::{debug, warn};

use crate::graph::{AccessTokenProvider, ApiError};

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Connection pool failure
    #[error("registry connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// SQL execution failure
    #[error("registry database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task running the query was cancelled or panicked
    #[error("registry task failed: {0}")]
    Task(String),
}

/// One user's stored tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTokenEntry {
    /// Stable user identifier (directory object ID)
    pub user_id: String,
    /// Address shown in listings
    pub user_email: String,
    /// Bearer token
    pub access_token: String,
    /// Refresh token, when granted
    pub refresh_token: Option<String>,
    /// Access token expiry (UTC)
    pub expires_at: DateTime<Utc>,
    /// When the row was first created (UTC)
    pub created_at: DateTime<Utc>,
    /// When the row was last updated (UTC)
    pub updated_at: DateTime<Utc>,
}

impl UserTokenEntry {
    /// Whether the stored access token is usable right now, applying the
    /// shared expiry buffer.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        valid_at(self.expires_at, Utc::now())
    }
}

/// A user row as shown in listings, with validity precomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserListing {
    /// Stable user identifier
    pub user_id: String,
    /// Address shown in listings
    pub user_email: String,
    /// Access token expiry (UTC)
    pub expires_at: DateTime<Utc>,
    /// Whether the token was usable at listing time
    pub token_valid: bool,
}

/// SQLite-backed registry of per-user tokens.
pub struct MultiUserTokenRegistry {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl MultiUserTokenRegistry {
    /// Open (or create) the registry database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = r2d2::Pool::builder().max_size(4).build(manager)?;

        let conn = pool.get()?;
        init_schema(&conn)?;
        debug!(path = %path.as_ref().display(), "user token registry opened");

        Ok(Self { pool })
    }

    /// Insert or update a user's tokens.
    ///
    /// An existing row keeps its `created_at`; everything else is
    /// replaced.
    pub async fn register(
        &self,
        user_id: &str,
        user_email: &str,
        record: &TokenRecord,
    ) -> Result<(), RegistryError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let user_email = user_email.to_string();
        let record = record.clone();

        task::spawn_blocking(move || -> Result<(), RegistryError> {
            let conn = pool.get()?;
            upsert_user_tokens(&conn, &user_id, &user_email, &record)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    /// Fetch one user's tokens.
    pub async fn get(&self, user_id: &str) -> Result<Option<UserTokenEntry>, RegistryError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();

        task::spawn_blocking(move || -> Result<Option<UserTokenEntry>, RegistryError> {
            let conn = pool.get()?;
            query_user_tokens(&conn, &user_id)
        })
        .await
        .map_err(map_join_error)?
    }

    /// List all registered users with computed token validity.
    pub async fn list(&self) -> Result<Vec<UserListing>, RegistryError> {
        let pool = self.pool.clone();

        task::spawn_blocking(move || -> Result<Vec<UserListing>, RegistryError> {
            let conn = pool.get()?;
            query_user_listings(&conn)
        })
        .await
        .map_err(map_join_error)?
    }

    /// Remove a user's tokens. Succeeds when the user was not registered.
    pub async fn remove(&self, user_id: &str) -> Result<(), RegistryError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();

        task::spawn_blocking(move || -> Result<(), RegistryError> {
            let conn = pool.get()?;
            conn.execute("DELETE FROM user_tokens WHERE user_id = ?1", params![user_id])?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

/// [`AccessTokenProvider`] over one registry row.
///
/// Distinguishes "never signed in" from "signed in but stale": a missing
/// row is `Unauthenticated`, an expired token is `AuthExpired`. No silent
/// renewal happens here; re-registration is the server's refresh path.
pub struct RegistryTokenProvider {
    registry: Arc<MultiUserTokenRegistry>,
    user_id: String,
}

impl RegistryTokenProvider {
    /// Provider for the given user.
    #[must_use]
    pub fn new(registry: Arc<MultiUserTokenRegistry>, user_id: impl Into<String>) -> Self {
        Self { registry, user_id: user_id.into() }
    }
}

#[async_trait]
impl AccessTokenProvider for RegistryTokenProvider {
    async fn access_token(&self) -> Result<String, ApiError> {
        let entry = match self.registry.get(&self.user_id).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "registry lookup failed");
                return Err(ApiError::Unauthenticated);
            }
        };

        match entry {
            None => Err(ApiError::Unauthenticated),
            Some(entry) if !entry.is_valid() => Err(ApiError::AuthExpired),
            Some(entry) => Ok(entry.access_token),
        }
    }
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_tokens (
            user_id TEXT PRIMARY KEY,
            user_email TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT,
            expires_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_user_tokens_email ON user_tokens(user_email);",
    )
}

fn upsert_user_tokens(
    conn: &Connection,
    user_id: &str,
    user_email: &str,
    record: &TokenRecord,
) -> Result<(), rusqlite::Error> {
    let now = Utc::now().timestamp();
    conn.execute(
        "INSERT INTO user_tokens
            (user_id, user_email, access_token, refresh_token, expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
            user_email = excluded.user_email,
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at",
        params![
            user_id,
            user_email,
            record.access_token,
            record.refresh_token,
            record.expires_at.timestamp(),
            now,
        ],
    )?;
    Ok(())
}

fn query_user_tokens(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<UserTokenEntry>, RegistryError> {
    let entry = conn
        .query_row(
            "SELECT user_id, user_email, access_token, refresh_token,
                    expires_at, created_at, updated_at
             FROM user_tokens WHERE user_id = ?1",
            params![user_id],
            row_to_entry,
        )
        .optional()?;
    Ok(entry)
}

fn query_user_listings(conn: &Connection) -> Result<Vec<UserListing>, RegistryError> {
    let now = Utc::now();
    let mut stmt = conn.prepare(
        "SELECT user_id, user_email, expires_at FROM user_tokens ORDER BY user_email",
    )?;
    let rows = stmt.query_map([], |row| {
        let expires_at = timestamp_column(row, 2)?;
        Ok(UserListing {
            user_id: row.get(0)?,
            user_email: row.get(1)?,
            expires_at,
            token_valid: valid_at(expires_at, now),
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(RegistryError::from)
}

fn row_to_entry(row: &Row<'_>) -> Result<UserTokenEntry, rusqlite::Error> {
    Ok(UserTokenEntry {
        user_id: row.get(0)?,
        user_email: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        expires_at: timestamp_column(row, 4)?,
        created_at: timestamp_column(row, 5)?,
        updated_at: timestamp_column(row, 6)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let seconds: i64 = row.get(index)?;
    Ok(Utc.timestamp_opt(seconds, 0).single().unwrap_or_default())
}

fn map_join_error(err: task::JoinError) -> RegistryError {
    RegistryError::Task(err.to_string())
}
