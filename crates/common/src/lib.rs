//! Shared foundation for the Mailhelm workspace.
//!
//! This crate owns everything the connector needs before it can talk to a
//! mailbox: the OAuth 2.0 authorization-code flow with PKCE, durable token
//! storage on the platform keychain, and the test doubles downstream crates
//! use to exercise that storage without touching a real keychain.
//!
//! Nothing in here performs interactive I/O (no browser, no loopback
//! listener); the orchestration of the login flow lives in `mailhelm-infra`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod keychain;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use auth::client::{OAuthClient, OAuthClientError};
pub use auth::pkce::PkceChallenge;
pub use auth::store::{SecretStore, StorageError, TokenStore};
pub use auth::types::{OAuthConfig, ProviderErrorBody, TokenRecord, TokenResponse};
pub use keychain::{KeychainError, KeychainProvider};
