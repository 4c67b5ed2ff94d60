//! OAuth 2.0 authorization-code flow with PKCE.
//!
//! Building blocks for the Microsoft identity platform login:
//! - [`pkce`]: verifier/challenge/state generation (RFC 7636, S256 only)
//! - [`types`]: token records, wire formats, and provider configuration
//! - [`client`]: the HTTP side of the flow (authorize URL, code exchange,
//!   refresh)
//! - [`store`]: durable token persistence over a [`store::SecretStore`]
//!
//! The interactive pieces (loopback listener, browser launch, CSRF check)
//! are composed on top of this module by `mailhelm-infra`.

pub mod client;
pub mod pkce;
pub mod store;
pub mod types;

pub use client::{OAuthClient, OAuthClientError};
pub use pkce::PkceChallenge;
pub use store::{SecretStore, StorageError, TokenStore};
pub use types::{OAuthConfig, ProviderErrorBody, TokenRecord, TokenResponse};
