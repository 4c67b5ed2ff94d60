//! Durable token storage
//!
//! Persists one [`TokenRecord`] per account as a single JSON blob behind a
//! [`SecretStore`]. A single keyed value keeps the overwrite atomic from
//! the caller's perspective; there is never a window where an access token
//! from one login sits next to a refresh token from another.
//!
//! Unreadable blobs (schema drift, manual edits) are treated as "no token",
//! not as errors: the caller falls back to an interactive login and the
//! next successful store overwrites the bad value.

use tracing::{debug, warn};

use super::types::TokenRecord;
use crate::keychain::{KeychainError, KeychainProvider};

/// Synchronous keyed secret storage.
///
/// Implemented by [`KeychainProvider`] for production and by the in-memory
/// double in `crate::testing` for tests.
pub trait SecretStore: Send + Sync {
    /// Store a value, overwriting any existing one.
    fn set(&self, key: &str, value: &str) -> Result<(), KeychainError>;

    /// Retrieve a value. Fails with [`KeychainError::NotFound`] when absent.
    fn get(&self, key: &str) -> Result<String, KeychainError>;

    /// Delete a value. Succeeds when the key never existed.
    fn delete(&self, key: &str) -> Result<(), KeychainError>;
}

impl SecretStore for KeychainProvider {
    fn set(&self, key: &str, value: &str) -> Result<(), KeychainError> {
        self.set_secret(key, value)
    }

    fn get(&self, key: &str) -> Result<String, KeychainError> {
        self.get_secret(key)
    }

    fn delete(&self, key: &str) -> Result<(), KeychainError> {
        self.delete_secret(key)
    }
}

/// Errors from token persistence
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The secret backend refused the operation
    #[error("token storage backend failed: {0}")]
    Backend(#[from] KeychainError),

    /// The record could not be encoded for storage
    #[error("token record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Token persistence for one account over a secret backend.
pub struct TokenStore<S: SecretStore> {
    secrets: S,
    account: String,
}

impl<S: SecretStore> TokenStore<S> {
    /// Create a store for the given account key.
    #[must_use]
    pub fn new(secrets: S, account: impl Into<String>) -> Self {
        Self { secrets, account: account.into() }
    }

    /// The account key records are stored under.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Persist a record, replacing any existing one.
    pub fn store(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let blob = serde_json::to_string(record)?;
        self.secrets.set(&self.account, &blob)?;
        debug!(account = %self.account, expires_at = %record.expires_at, "token record stored");
        Ok(())
    }

    /// Load the stored record, if any.
    ///
    /// Returns `Ok(None)` both when nothing is stored and when the stored
    /// blob fails to decode; only backend failures surface as errors.
    pub fn load(&self) -> Result<Option<TokenRecord>, StorageError> {
        let blob = match self.secrets.get(&self.account) {
            Ok(blob) => blob,
            Err(KeychainError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(StorageError::Backend(e)),
        };

        match serde_json::from_str(&blob) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(account = %self.account, error = %e, "stored token record unreadable, treating as absent");
                Ok(None)
            }
        }
    }

    /// Remove the stored record. Succeeds when nothing was stored.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.secrets.delete(&self.account)?;
        debug!(account = %self.account, "token record cleared");
        Ok(())
    }

    /// Whether a record exists and is still usable.
    ///
    /// Backend failures count as "no valid token".
    #[must_use]
    pub fn has_valid_token(&self) -> bool {
        matches!(self.load(), Ok(Some(record)) if record.is_valid())
    }
}
