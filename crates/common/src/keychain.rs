//! Platform keychain access.
//!
//! Thin wrapper around the `keyring` crate (macOS Keychain, Windows
//! Credential Manager, Secret Service on Linux). Secrets are addressed by a
//! `(service, key)` pair; the service name is fixed per provider instance so
//! all Mailhelm entries group together in the OS credential UI.

use keyring::Entry;
use tracing::debug;

/// Errors from keychain operations
#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    /// The OS refused or failed the operation (locked keychain, denied
    /// prompt, missing D-Bus service, ...)
    #[error("keychain access failed: {0}")]
    AccessFailed(String),

    /// No entry exists for the requested key
    #[error("no keychain entry for key: {0}")]
    NotFound(String),

    /// Underlying keyring backend error
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Secret storage backed by the operating system keychain.
#[derive(Debug, Clone)]
pub struct KeychainProvider {
    service_name: String,
}

impl KeychainProvider {
    /// Create a provider scoped to the given service name.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into() }
    }

    /// The service name entries are grouped under.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn entry(&self, key: &str) -> Result<Entry, KeychainError> {
        Entry::new(&self.service_name, key).map_err(KeychainError::from)
    }

    /// Store a secret, overwriting any existing value for the key.
    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), KeychainError> {
        self.entry(key)?.set_password(value)?;
        debug!(key, "stored keychain secret");
        Ok(())
    }

    /// Retrieve a secret.
    ///
    /// # Errors
    /// `KeychainError::NotFound` if no entry exists for the key.
    pub fn get_secret(&self, key: &str) -> Result<String, KeychainError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(value),
            Err(keyring::Error::NoEntry) => Err(KeychainError::NotFound(key.to_string())),
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }

    /// Delete a secret. Succeeds if the entry never existed.
    pub fn delete_secret(&self, key: &str) -> Result<(), KeychainError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                debug!(key, "deleted keychain secret");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }

    /// Check whether an entry exists without returning its value.
    pub fn secret_exists(&self, key: &str) -> Result<bool, KeychainError> {
        match self.entry(key)?.get_password() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }
}
