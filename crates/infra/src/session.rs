//! Login orchestration.
//!
//! [`AuthSession`] drives one account's authentication lifecycle: the
//! interactive browser login, silent refresh from the stored refresh
//! token, token lookup for API calls, and logout. It composes the OAuth
//! building blocks from `mailhelm-common` with the loopback
//! [`CallbackReceiver`].
//!
//! A login attempt moves through `awaiting_callback` and
//! `exchanging_code` before it completes; the phases show up as tracing
//! fields, not public state.

use std::time::Duration;

use async_trait::async_trait;
use mailhelm_common::auth::store::SecretStore;
use mailhelm_common::{
    KeychainProvider, OAuthClient, OAuthClientError, PkceChallenge, StorageError, TokenRecord,
    TokenStore,
};
use tracing::{debug, info, warn};

use crate::callback::{BindError, CallbackOutcome, CallbackReceiver};
use crate::config::AppConfig;
use crate::graph::{AccessTokenProvider, ApiError};

/// How long an interactive login may sit waiting for the user by default.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Function used to open the authorization URL in the user's browser.
///
/// Injectable so tests can intercept the URL and play the provider's role.
pub type BrowserLauncher = Box<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Another interactive login is running in this process
    #[error("a login attempt is already in progress")]
    LoginInProgress,

    /// The loopback port could not be bound
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The system browser could not be opened
    #[error("could not open the system browser: {0}")]
    Browser(String),

    /// No callback arrived within the allowed time
    #[error("timed out after {0:?} waiting for the sign-in callback")]
    Timeout(Duration),

    /// The provider redirected back with an error (consent declined, ...)
    #[error("provider denied authorization: {code}")]
    ProviderDenied {
        /// Machine-readable error code from the provider
        code: String,
        /// Human-readable detail, when supplied
        description: Option<String>,
    },

    /// The callback's state nonce did not match the one this login issued
    #[error("sign-in callback failed CSRF validation (state mismatch)")]
    CsrfMismatch,

    /// The callback carried neither a code nor an error
    #[error("sign-in callback was malformed")]
    MalformedCallback,

    /// Code exchange or refresh failed at the token endpoint
    #[error("token request failed: {0}")]
    TokenRequest(#[from] OAuthClientError),

    /// No usable refresh path exists; an interactive login is needed
    #[error("interactive sign-in required")]
    ReauthRequired,

    /// Token persistence failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Authentication lifecycle for one account.
pub struct AuthSession<S: SecretStore> {
    oauth: OAuthClient,
    tokens: TokenStore<S>,
    callback_port: u16,
    browser: BrowserLauncher,
    // Held for the duration of login(); try_lock failure means a second
    // concurrent attempt, which is rejected rather than queued.
    login_guard: tokio::sync::Mutex<()>,
}

impl AuthSession<KeychainProvider> {
    /// Build a session from application configuration, storing tokens on
    /// the platform keychain under the account `default`.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let keychain = KeychainProvider::new(config.keychain_service.clone());
        Self::new(
            OAuthClient::new(config.oauth_config()),
            TokenStore::new(keychain, "default"),
            config.callback_port,
        )
    }
}

impl<S: SecretStore> AuthSession<S> {
    /// Build a session from its parts. The default browser launcher opens
    /// the URL with the OS handler.
    #[must_use]
    pub fn new(oauth: OAuthClient, tokens: TokenStore<S>, callback_port: u16) -> Self {
        Self {
            oauth,
            tokens,
            callback_port,
            browser: Box::new(|url| open::that(url)),
            login_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the browser launcher (tests).
    #[must_use]
    pub fn with_browser_launcher(mut self, browser: BrowserLauncher) -> Self {
        self.browser = browser;
        self
    }

    /// Whether a usable token is currently stored.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.tokens.has_valid_token()
    }

    /// Sign the user in, waiting at most `timeout` for the browser
    /// round-trip.
    ///
    /// Short-circuits without any interaction when a usable token is
    /// already stored or silent refresh succeeds. Otherwise runs the full
    /// authorization-code flow: bind the loopback listener, open the
    /// browser, capture one callback, validate the state nonce, exchange
    /// the code, persist the tokens.
    pub async fn login(&self, timeout: Duration) -> Result<TokenRecord, AuthError> {
        let _guard = self.login_guard.try_lock().map_err(|_| AuthError::LoginInProgress)?;

        if let Ok(Some(record)) = self.tokens.load() {
            if record.is_valid() {
                debug!("login satisfied by stored token");
                return Ok(record);
            }
        }
        match self.refresh_stored_token().await {
            Ok(record) => {
                info!("login satisfied by silent refresh");
                return Ok(record);
            }
            Err(AuthError::ReauthRequired) => {}
            Err(err) => {
                warn!(error = %err, "silent refresh failed, falling back to interactive login");
            }
        }

        let mut receiver = CallbackReceiver::bind(self.callback_port).await?;
        let pkce = PkceChallenge::generate();
        let url = self.oauth.authorization_url(&pkce);

        debug!(phase = "awaiting_callback", port = receiver.port(), "opening browser for sign-in");
        if let Err(err) = (self.browser)(&url) {
            receiver.stop().await;
            return Err(AuthError::Browser(err.to_string()));
        }

        let outcome = receiver.wait(timeout).await;
        // The listener's job ends with the first callback or the timeout,
        // whichever comes first.
        receiver.stop().await;

        let record = match outcome {
            None => return Err(AuthError::Timeout(timeout)),
            Some(CallbackOutcome::ProviderError { error, description }) => {
                return Err(AuthError::ProviderDenied { code: error, description });
            }
            Some(CallbackOutcome::Malformed) => return Err(AuthError::MalformedCallback),
            Some(CallbackOutcome::Code { code, params }) => {
                let returned_state = params.get("state").map(String::as_str).unwrap_or_default();
                if returned_state != pkce.state {
                    warn!("discarding callback with mismatched state nonce");
                    return Err(AuthError::CsrfMismatch);
                }
                debug!(phase = "exchanging_code", "authorization code received");
                self.oauth.exchange_code(&code, &pkce.verifier).await?
            }
        };

        self.tokens.store(&record)?;
        info!(expires_at = %record.expires_at, "login complete");
        Ok(record)
    }

    /// Renew tokens from the stored refresh token, without interaction.
    ///
    /// `ReauthRequired` means there is nothing to refresh with (no record,
    /// no refresh token, or the provider revoked the grant); anything else
    /// is a transient failure worth retrying.
    pub async fn refresh_silently(&self) -> Result<TokenRecord, AuthError> {
        self.refresh_stored_token().await
    }

    async fn refresh_stored_token(&self) -> Result<TokenRecord, AuthError> {
        let record = match self.tokens.load() {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "token storage unreadable, treating as signed out");
                None
            }
        };
        let refresh_token =
            record.and_then(|r| r.refresh_token).ok_or(AuthError::ReauthRequired)?;

        let renewed = match self.oauth.refresh(&refresh_token).await {
            Ok(renewed) => renewed,
            Err(err) if err.is_invalid_grant() => {
                info!("refresh token no longer accepted, interactive sign-in required");
                return Err(AuthError::ReauthRequired);
            }
            Err(err) => return Err(AuthError::TokenRequest(err)),
        };

        self.tokens.store(&renewed)?;
        debug!(expires_at = %renewed.expires_at, "tokens refreshed silently");
        Ok(renewed)
    }

    /// A usable access token, refreshing first when the stored one is
    /// stale. `None` means the caller has to run [`login`](Self::login).
    pub async fn get_access_token(&self) -> Option<String> {
        match self.tokens.load() {
            Ok(Some(record)) if record.is_valid() => return Some(record.access_token),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "token storage unreadable"),
        }

        match self.refresh_stored_token().await {
            Ok(record) => Some(record.access_token),
            Err(err) => {
                debug!(error = %err, "no access token available");
                None
            }
        }
    }

    /// Sign out by discarding stored tokens. Succeeds when already signed
    /// out.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.tokens.clear()?;
        info!("signed out, stored tokens cleared");
        Ok(())
    }
}

#[async_trait]
impl<S: SecretStore + 'static> AccessTokenProvider for AuthSession<S> {
    async fn access_token(&self) -> Result<String, ApiError> {
        self.get_access_token().await.ok_or(ApiError::Unauthenticated)
    }

    async fn refresh_after_rejection(&self) -> bool {
        self.refresh_silently().await.is_ok()
    }
}
