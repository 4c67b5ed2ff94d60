//! Test doubles for downstream crates.
//!
//! Enabled for this crate's own tests and, via the `test-utils` feature,
//! for dependents that need token storage without a real keychain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::auth::store::SecretStore;
use crate::keychain::KeychainError;

/// In-memory [`SecretStore`] with the same observable semantics as
/// [`KeychainProvider`](crate::keychain::KeychainProvider): missing keys
/// fail lookups with `NotFound`, deletes are idempotent.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeychain {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeychain {
    /// Create an empty keychain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SecretStore for MemoryKeychain {
    fn set(&self, key: &str, value: &str) -> Result<(), KeychainError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<String, KeychainError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| KeychainError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), KeychainError> {
        self.lock().remove(key);
        Ok(())
    }
}
