//! OAuth 2.0 types and provider configuration
//!
//! Token record persisted to the keychain, the wire format returned by the
//! token endpoint, and the per-provider endpoint configuration. The token
//! validity rule (expiry minus a fixed safety buffer) lives here so every
//! consumer, including the multi-user registry, applies the same boundary.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds before nominal expiry at which a token stops counting as valid.
///
/// Covers clock skew and in-flight request time: a token that expires
/// mid-request is worse than one refreshed slightly early.
pub const EXPIRY_BUFFER_SECS: i64 = 300;

/// Whether a token expiring at `expires_at` is usable at instant `now`.
///
/// Valid iff `now < expires_at - EXPIRY_BUFFER_SECS`. The boundary instant
/// itself (exactly buffer seconds before expiry) is NOT valid.
#[must_use]
pub fn valid_at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now < expires_at - Duration::seconds(EXPIRY_BUFFER_SECS)
}

/// A stored OAuth token with its lifetime metadata.
///
/// One record exists per signed-in account; storing a new record replaces
/// the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer token for Graph API authentication
    pub access_token: String,

    /// Refresh token for silent renewal. Absent when the `offline_access`
    /// scope was not granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When the token was obtained (UTC)
    pub issued_at: DateTime<Utc>,

    /// Absolute expiration timestamp (UTC), computed from the provider's
    /// `expires_in` at issue time
    pub expires_at: DateTime<Utc>,

    /// Granted scopes
    pub scope: Vec<String>,

    /// Token type, "Bearer" for OAuth 2.0
    pub token_type: String,
}

impl TokenRecord {
    /// Build a record from a token endpoint response, stamping issue and
    /// expiry times against the current clock.
    #[must_use]
    pub fn from_response(response: TokenResponse) -> Self {
        Self::from_response_at(response, Utc::now())
    }

    /// Like [`from_response`](Self::from_response) with an explicit clock.
    #[must_use]
    pub fn from_response_at(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let scope = response
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            issued_at: now,
            expires_at: now + Duration::seconds(response.expires_in),
            scope,
            token_type: response.token_type,
        }
    }

    /// Whether the token is usable right now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Whether the token is usable at the given instant.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        valid_at(self.expires_at, now)
    }

    /// Seconds until the token stops being usable (may be negative).
    #[must_use]
    pub fn seconds_until_stale(&self) -> i64 {
        (self.expires_at - Duration::seconds(EXPIRY_BUFFER_SECS) - Utc::now()).num_seconds()
    }
}

/// Token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The issued access token
    pub access_token: String,
    /// Refresh token, when granted
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token type, "Bearer"
    pub token_type: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Space-separated granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

/// Error body returned by the provider (RFC 6749 §5.2), from either the
/// token endpoint or the authorization callback.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderErrorBody {
    /// Machine-readable error code, e.g. `invalid_grant`
    pub error: String,
    /// Human-readable detail, when the provider supplies one
    #[serde(default)]
    pub error_description: Option<String>,
}

impl fmt::Display for ProviderErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}

/// OAuth endpoint configuration for an authorization server.
///
/// Endpoints are stored explicitly rather than derived from a domain so
/// tests can point both at a local mock server.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// OAuth client (application) ID
    pub client_id: String,

    /// Loopback redirect URI registered for the application
    pub redirect_uri: String,

    /// Scopes to request
    pub scopes: Vec<String>,

    /// Full authorization endpoint URL
    pub authorize_endpoint: String,

    /// Full token endpoint URL
    pub token_endpoint: String,
}

impl OAuthConfig {
    /// Configuration for the Microsoft identity platform v2.0 endpoints.
    ///
    /// `tenant` is a directory ID, a verified domain, or one of the
    /// pseudo-tenants (`common`, `organizations`, `consumers`).
    #[must_use]
    pub fn microsoft(
        tenant: &str,
        client_id: String,
        redirect_uri: String,
        scopes: Vec<String>,
    ) -> Self {
        let authority = format!("https://login.microsoftonline.com/{tenant}");
        Self {
            client_id,
            redirect_uri,
            scopes,
            authorize_endpoint: format!("{authority}/oauth2/v2.0/authorize"),
            token_endpoint: format!("{authority}/oauth2/v2.0/token"),
        }
    }

    /// Scopes joined with spaces, as the wire format expects.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}
