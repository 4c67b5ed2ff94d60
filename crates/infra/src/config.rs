//! Application configuration
//!
//! Loads connector settings from environment variables.
//!
//! ## Environment Variables
//! - `MAILHELM_CLIENT_ID`: Azure app registration client ID (required)
//! - `MAILHELM_TENANT_ID`: Directory tenant, defaults to `common`
//! - `MAILHELM_CALLBACK_PORT`: Loopback port for the OAuth redirect,
//!   defaults to 8082
//! - `MAILHELM_KEYCHAIN_SERVICE`: Keychain service name, defaults to
//!   `mailhelm`
//! - `MAILHELM_GRAPH_BASE_URL`: Graph API base, defaults to
//!   `https://graph.microsoft.com/v1.0` (override for mock servers)

use mailhelm_common::OAuthConfig;

/// Scopes the connector requests. `offline_access` is what makes the
/// provider issue a refresh token.
pub const DEFAULT_SCOPES: [&str; 4] =
    ["Mail.Read", "MailboxSettings.Read", "User.Read", "offline_access"];

const DEFAULT_TENANT: &str = "common";
const DEFAULT_CALLBACK_PORT: u16 = 8082;
const DEFAULT_KEYCHAIN_SERVICE: &str = "mailhelm";
const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A variable is set but unparseable
    #[error("invalid value for {name}: {reason}")]
    InvalidVar {
        /// Variable name
        name: &'static str,
        /// What was wrong with it
        reason: String,
    },
}

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Azure app registration client ID
    pub client_id: String,
    /// Directory tenant (`common` for multi-tenant)
    pub tenant_id: String,
    /// Loopback port the callback receiver binds
    pub callback_port: u16,
    /// Scopes to request at login
    pub scopes: Vec<String>,
    /// Keychain service name token records are stored under
    pub keychain_service: String,
    /// Graph API base URL without trailing slash
    pub graph_base_url: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_lookup(|name| std::env::var(name).ok())?;
        tracing::info!(
            tenant = %config.tenant_id,
            port = config.callback_port,
            "configuration loaded from environment"
        );
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let client_id = lookup("MAILHELM_CLIENT_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingVar("MAILHELM_CLIENT_ID"))?;
        if client_id.to_ascii_uppercase().contains("YOUR_CLIENT_ID") {
            return Err(ConfigError::InvalidVar {
                name: "MAILHELM_CLIENT_ID",
                reason: "placeholder value, set the app registration's client ID".to_string(),
            });
        }

        let tenant_id = lookup("MAILHELM_TENANT_ID")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TENANT.to_string());

        let callback_port = match lookup("MAILHELM_CALLBACK_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidVar {
                name: "MAILHELM_CALLBACK_PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_CALLBACK_PORT,
        };

        let keychain_service = lookup("MAILHELM_KEYCHAIN_SERVICE")
            .unwrap_or_else(|| DEFAULT_KEYCHAIN_SERVICE.to_string());

        let graph_base_url = lookup("MAILHELM_GRAPH_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string());

        Ok(Self {
            client_id,
            tenant_id,
            callback_port,
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            keychain_service,
            graph_base_url,
        })
    }

    /// The redirect URI the callback receiver serves.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.callback_port)
    }

    /// OAuth endpoint configuration for this tenant.
    #[must_use]
    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig::microsoft(
            &self.tenant_id,
            self.client_id.clone(),
            self.redirect_uri(),
            self.scopes.clone(),
        )
    }
}
