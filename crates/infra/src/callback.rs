//! Loopback HTTP server that receives the OAuth redirect.
//!
//! One receiver exists per login attempt. It binds `127.0.0.1`, captures
//! exactly one callback outcome, and is torn down as soon as the attempt
//! resolves. Later requests (browser refresh, favicon probes) get a static
//! page and never disturb the captured outcome.
//!
//! No CSRF validation happens here; the receiver reports what arrived and
//! the session compares the state nonce against the one it issued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// The loopback port could not be bound.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind OAuth callback listener on 127.0.0.1:{port}: {source}")]
pub struct BindError {
    /// Requested port (0 means ephemeral)
    pub port: u16,
    /// Underlying socket error
    #[source]
    pub source: std::io::Error,
}

/// What the provider's redirect carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Authorization succeeded
    Code {
        /// The authorization code to exchange
        code: String,
        /// All query parameters, including `state`
        params: HashMap<String, String>,
    },
    /// The provider reported an error (user declined consent, bad request)
    ProviderError {
        /// Machine-readable error code, e.g. `access_denied`
        error: String,
        /// Human-readable detail, when supplied
        description: Option<String>,
    },
    /// A request reached the callback path with neither `code` nor `error`
    Malformed,
}

#[derive(Debug)]
struct ReceiverState {
    outcome: StdMutex<Option<CallbackOutcome>>,
    resolved: AtomicBool,
    arrived: Notify,
}

/// One-shot loopback receiver for the OAuth redirect.
#[derive(Debug)]
pub struct CallbackReceiver {
    port: u16,
    state: Arc<ReceiverState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CallbackReceiver {
    /// Bind `127.0.0.1:port` and start serving. Pass port 0 for an
    /// ephemeral port (tests).
    pub async fn bind(port: u16) -> Result<Self, BindError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| BindError { port, source })?;
        let bound_port =
            listener.local_addr().map_err(|source| BindError { port, source })?.port();

        let state = Arc::new(ReceiverState {
            outcome: StdMutex::new(None),
            resolved: AtomicBool::new(false),
            arrived: Notify::new(),
        });

        let handler_state = state.clone();
        let app = Router::new()
            .route(
                "/",
                get(move |query: Query<HashMap<String, String>>| {
                    handle_redirect(query, handler_state.clone())
                }),
            )
            .fallback(|| async { (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE.to_string())) });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!("OAuth callback listener error: {err}");
            }
        });

        debug!(port = bound_port, "OAuth callback listener started");
        Ok(Self { port: bound_port, state, shutdown_tx: Some(shutdown_tx), handle: Some(handle) })
    }

    /// The port actually bound.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI this receiver serves.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    /// Wait for the callback, up to `timeout`.
    ///
    /// Returns `None` on timeout. The outcome is handed over exactly once;
    /// a second call waits for an outcome that will never come.
    pub async fn wait(&self, timeout: Duration) -> Option<CallbackOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for the wakeup before checking, so an outcome that
            // lands between the check and the await still wakes us.
            let arrived = self.state.arrived.notified();
            if let Some(outcome) = self.take_outcome() {
                return Some(outcome);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return self.take_outcome();
            }
        }
    }

    fn take_outcome(&self) -> Option<CallbackOutcome> {
        match self.state.outcome.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Shut the listener down gracefully. Safe to call more than once.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!("OAuth callback listener panicked: {err}");
                }
            }
        }
    }
}

impl Drop for CallbackReceiver {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

const SUCCESS_PAGE: &str = "<html><body><h2>Sign-in complete</h2>\
    <p>You can close this window and return to the application.</p></body></html>";
const ERROR_PAGE: &str = "<html><body><h2>Sign-in failed</h2>\
    <p>The sign-in attempt was not completed. You can close this window.</p></body></html>";
const ALREADY_HANDLED_PAGE: &str = "<html><body><h2>Already signed in</h2>\
    <p>This sign-in attempt was already handled. You can close this window.</p></body></html>";
const NOT_FOUND_PAGE: &str = "<html><body><h2>Not found</h2></body></html>";

async fn handle_redirect(
    Query(params): Query<HashMap<String, String>>,
    state: Arc<ReceiverState>,
) -> (StatusCode, Html<String>) {
    if state.resolved.swap(true, Ordering::SeqCst) {
        debug!("ignoring extra request on resolved callback listener");
        return (StatusCode::OK, Html(ALREADY_HANDLED_PAGE.to_string()));
    }

    let (outcome, status, page) = if let Some(code) = params.get("code") {
        let outcome = CallbackOutcome::Code { code: code.clone(), params: params.clone() };
        (outcome, StatusCode::OK, SUCCESS_PAGE)
    } else if let Some(error) = params.get("error") {
        warn!(error = %error, "OAuth provider returned an error callback");
        let outcome = CallbackOutcome::ProviderError {
            error: error.clone(),
            description: params.get("error_description").cloned(),
        };
        (outcome, StatusCode::BAD_REQUEST, ERROR_PAGE)
    } else {
        warn!("OAuth callback arrived without code or error");
        (CallbackOutcome::Malformed, StatusCode::BAD_REQUEST, ERROR_PAGE)
    };

    match state.outcome.lock() {
        Ok(mut guard) => *guard = Some(outcome),
        Err(poisoned) => *poisoned.into_inner() = Some(outcome),
    }
    state.arrived.notify_one();

    (status, Html(page.to_string()))
}
