//! # Mailhelm Infrastructure
//!
//! The I/O side of the connector:
//! - Loopback HTTP listener that captures the OAuth redirect ([`callback`])
//! - Login orchestration over `mailhelm-common`'s OAuth building blocks
//!   ([`session`])
//! - Microsoft Graph client with retry and normalization ([`graph`])
//! - Environment-driven configuration ([`config`])
//! - Optional SQLite registry for server deployments holding tokens for
//!   many users ([`registry`])

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod callback;
pub mod config;
pub mod graph;
pub mod registry;
pub mod session;

pub use callback::{BindError, CallbackOutcome, CallbackReceiver};
pub use config::{AppConfig, ConfigError};
pub use graph::{AccessTokenProvider, ApiError, GraphClient, GraphClientConfig};
pub use registry::{MultiUserTokenRegistry, RegistryError, RegistryTokenProvider, UserTokenEntry};
pub use session::{AuthError, AuthSession, DEFAULT_LOGIN_TIMEOUT};
