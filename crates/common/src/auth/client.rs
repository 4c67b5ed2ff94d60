//! OAuth 2.0 HTTP client
//!
//! The non-interactive half of the authorization-code flow: building the
//! authorization URL for the browser, exchanging the returned code for
//! tokens, and refreshing. Flow state (verifier, state nonce) is owned by
//! the caller and passed in per call, so one client instance can serve
//! concurrent flows without interior locking.

use std::time::Duration;

use tracing::{debug, warn};

use super::pkce::PkceChallenge;
use super::types::{OAuthConfig, ProviderErrorBody, TokenRecord, TokenResponse};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the OAuth HTTP client
#[derive(Debug, thiserror::Error)]
pub enum OAuthClientError {
    /// Request never produced an HTTP response (DNS, connect, timeout)
    #[error("token endpoint request failed: {0}")]
    Network(String),

    /// The provider returned a structured OAuth error (RFC 6749 §5.2)
    #[error("provider rejected the request: {0}")]
    Provider(ProviderErrorBody),

    /// Non-success response that was not a parseable OAuth error body
    #[error("unexpected token endpoint response ({status}): {body}")]
    UnexpectedResponse {
        /// HTTP status code
        status: u16,
        /// Raw response body, for the logs
        body: String,
    },

    /// Success response whose body did not match the token wire format
    #[error("malformed token endpoint response: {0}")]
    Decode(String),
}

impl OAuthClientError {
    /// Whether this is the provider telling us the grant itself is dead
    /// (revoked or expired refresh token). Callers treat this as "start an
    /// interactive login", unlike transient failures.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::Provider(body) if body.error == "invalid_grant")
    }
}

/// HTTP client for the authorization-code-with-PKCE flow.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Create a client for the given provider configuration.
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    /// The provider configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL to open in the user's browser.
    ///
    /// Carries the PKCE challenge and the CSRF state; the verifier never
    /// appears here.
    #[must_use]
    pub fn authorization_url(&self, pkce: &PkceChallenge) -> String {
        let scope = self.config.scope_string();
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_mode", "query"),
            ("scope", scope.as_str()),
            ("state", pkce.state.as_str()),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", pkce.challenge_method()),
        ];

        let query = params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.config.authorize_endpoint, query)
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `verifier` must be the PKCE verifier from the same flow that produced
    /// the code.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<TokenRecord, OAuthClientError> {
        debug!("exchanging authorization code for tokens");
        let scope = self.config.scope_string();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", verifier),
            ("scope", scope.as_str()),
        ];
        self.post_token_request(&form).await
    }

    /// Obtain a fresh token set from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, OAuthClientError> {
        debug!("refreshing access token");
        let scope = self.config.scope_string();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        self.post_token_request(&form).await
    }

    async fn post_token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<TokenRecord, OAuthClientError> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthClientError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OAuthClientError::Network(e.to_string()))?;

        if status.is_success() {
            let parsed: TokenResponse = serde_json::from_str(&body)
                .map_err(|e| OAuthClientError::Decode(e.to_string()))?;
            return Ok(TokenRecord::from_response(parsed));
        }

        match serde_json::from_str::<ProviderErrorBody>(&body) {
            Ok(oauth_error) => {
                warn!(error = %oauth_error.error, "token endpoint returned OAuth error");
                Err(OAuthClientError::Provider(oauth_error))
            }
            Err(_) => Err(OAuthClientError::UnexpectedResponse { status: status.as_u16(), body }),
        }
    }
}
