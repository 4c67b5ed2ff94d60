//! Microsoft Graph API client.
//!
//! [`GraphClient`] issues bearer-authenticated requests through an
//! [`AccessTokenProvider`] and applies one retry policy everywhere:
//! - 401: fail immediately with [`ApiError::AuthExpired`], never retried at
//!   this level. High-level operations attempt one silent refresh and one
//!   repeat call.
//! - 429: wait exactly the `Retry-After` header (default 60 s), retry.
//! - 503: exponential backoff `min(2^attempt, 60)` seconds, retry.
//! - connect/timeout errors: exponential backoff capped at 30 s, retry.
//! - other non-success statuses: fail immediately with status and body.
//!
//! Normalized response types live in [`types`].

mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use types::{MailFolder, MessageBody, MessageDetail, MessageSummary, UserProfile};

/// Graph caps `$top` at 999 items per page.
const GRAPH_PAGE_CAP: usize = 999;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const SERVICE_BACKOFF_CAP_SECS: u64 = 60;
const NETWORK_BACKOFF_CAP_SECS: u64 = 30;

const SUMMARY_SELECT: &str =
    "id,subject,from,receivedDateTime,bodyPreview,isRead,hasAttachments,importance";
const DETAIL_SELECT: &str = "id,subject,from,toRecipients,ccRecipients,receivedDateTime,\
                             sentDateTime,body,bodyPreview,isRead,hasAttachments,importance,categories";

/// Graph API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No access token is available; sign in first
    #[error("not authenticated: no access token available")]
    Unauthenticated,

    /// The API rejected the token (401); a refresh or re-login is needed
    #[error("authentication expired: the access token was rejected")]
    AuthExpired,

    /// 429 responses exhausted the retry budget
    #[error("rate limited by the API after {attempts} attempts")]
    RateLimited {
        /// Requests sent before giving up
        attempts: u32,
    },

    /// 503 responses exhausted the retry budget
    #[error("service unavailable after {attempts} attempts")]
    ServiceUnavailable {
        /// Requests sent before giving up
        attempts: u32,
    },

    /// Any other non-success response
    #[error("API request failed ({status}): {body}")]
    ClientError {
        /// HTTP status code
        status: u16,
        /// Response body text
        body: String,
    },

    /// The request never produced an HTTP response
    #[error("network error: {0}")]
    Network(String),

    /// A success response whose body was not the expected JSON
    #[error("invalid response from the API: {0}")]
    InvalidResponse(String),
}

/// Source of bearer tokens for [`GraphClient`].
///
/// Implemented by `AuthSession` (single user, keychain-backed) and by
/// [`RegistryTokenProvider`](crate::registry::RegistryTokenProvider)
/// (server deployments).
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// A token expected to be accepted right now.
    async fn access_token(&self) -> Result<String, ApiError>;

    /// Called after the API rejected a token this provider handed out.
    /// Returns true when a fresh token is worth fetching; providers with
    /// no silent renewal path keep the default.
    async fn refresh_after_rejection(&self) -> bool {
        false
    }
}

/// Tunables for [`GraphClient`].
#[derive(Debug, Clone)]
pub struct GraphClientConfig {
    /// API base URL without trailing slash
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after the initial attempt, for retryable failures
    pub max_retries: u32,
}

impl Default for GraphClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com/v1.0".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Client for mailbox operations against the Graph API.
pub struct GraphClient {
    auth: Arc<dyn AccessTokenProvider>,
    http: reqwest::Client,
    config: GraphClientConfig,
}

impl GraphClient {
    /// Build a client over the given token provider with default tunables.
    #[must_use]
    pub fn new(auth: Arc<dyn AccessTokenProvider>) -> Self {
        Self::with_config(auth, GraphClientConfig::default())
    }

    /// Build a client with explicit tunables.
    #[must_use]
    pub fn with_config(auth: Arc<dyn AccessTokenProvider>, config: GraphClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { auth, http, config }
    }

    /// Issue one authenticated request with the retry policy applied.
    ///
    /// The token is fetched once up front; without one, no network call is
    /// made. A 401 is returned immediately so the caller can refresh.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}{}", self.config.base_url, path);

        let mut attempt: u32 = 0;
        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header(ACCEPT, "application/json");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(json) = body {
                request = request.json(json);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt < self.config.max_retries {
                        let wait = backoff_secs(attempt, NETWORK_BACKOFF_CAP_SECS);
                        warn!(attempt, wait_secs = wait, error = %err, "network error, retrying");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ApiError::Network(err.to_string()));
                }
            };

            match response.status() {
                StatusCode::UNAUTHORIZED => return Err(ApiError::AuthExpired),
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    if attempt < self.config.max_retries {
                        warn!(attempt, wait_secs = retry_after, "rate limited, honoring Retry-After");
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ApiError::RateLimited { attempts: attempt + 1 });
                }
                StatusCode::SERVICE_UNAVAILABLE => {
                    if attempt < self.config.max_retries {
                        let wait = backoff_secs(attempt, SERVICE_BACKOFF_CAP_SECS);
                        warn!(attempt, wait_secs = wait, "service unavailable, backing off");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ApiError::ServiceUnavailable { attempts: attempt + 1 });
                }
                status if !status.is_success() => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::ClientError { status: status.as_u16(), body });
                }
                _ => {
                    return response
                        .json()
                        .await
                        .map_err(|e| ApiError::InvalidResponse(e.to_string()));
                }
            }
        }
    }

    /// [`request`](Self::request) plus one silent-refresh-and-repeat on a
    /// rejected token.
    async fn request_with_reauth(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        match self.request(method.clone(), path, query, body).await {
            Err(ApiError::AuthExpired) => {
                debug!("access token rejected, attempting silent refresh");
                if self.auth.refresh_after_rejection().await {
                    return self.request(method, path, query, body).await;
                }
                Err(ApiError::AuthExpired)
            }
            other => other,
        }
    }

    /// Search the signed-in mailbox.
    ///
    /// `query` is quote-stripped and sent as `$search` when non-empty;
    /// `days_back` adds a `receivedDateTime` filter; results are newest
    /// first and capped at `max_results` even when the server returns a
    /// fuller page.
    pub async fn search_messages(
        &self,
        query: &str,
        days_back: Option<u32>,
        max_results: usize,
    ) -> Result<Vec<MessageSummary>, ApiError> {
        let mut params: Vec<(&str, String)> = vec![
            ("$top", max_results.min(GRAPH_PAGE_CAP).to_string()),
            ("$select", SUMMARY_SELECT.to_string()),
            ("$orderby", "receivedDateTime desc".to_string()),
        ];

        let sanitized = query.replace('"', "");
        let sanitized = sanitized.trim();
        if !sanitized.is_empty() {
            params.push(("$search", format!("\"{sanitized}\"")));
        }

        if let Some(days) = days_back.filter(|d| *d > 0) {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            params.push((
                "$filter",
                format!("receivedDateTime ge {}", cutoff.format("%Y-%m-%dT%H:%M:%SZ")),
            ));
        }

        let response =
            self.request_with_reauth(Method::GET, "/me/messages", &params, None).await?;
        let messages: Vec<MessageSummary> = response
            .get("value")
            .and_then(Value::as_array)
            .map(|items| {
                items.iter().take(max_results).map(MessageSummary::from_graph).collect()
            })
            .unwrap_or_default();

        info!(count = messages.len(), "message search complete");
        Ok(messages)
    }

    /// Fetch one message in full, body included.
    pub async fn get_message_details(&self, message_id: &str) -> Result<MessageDetail, ApiError> {
        let params = [("$select", DETAIL_SELECT.to_string())];
        let path = format!("/me/messages/{message_id}");
        let response = self.request_with_reauth(Method::GET, &path, &params, None).await?;
        Ok(MessageDetail::from_graph(&response))
    }

    /// Fetch the signed-in user's profile.
    pub async fn get_user_profile(&self) -> Result<UserProfile, ApiError> {
        let response = self.request_with_reauth(Method::GET, "/me", &[], None).await?;
        Ok(UserProfile::from_graph(&response))
    }

    /// List the mailbox folders with their item counts.
    pub async fn list_mail_folders(&self) -> Result<Vec<MailFolder>, ApiError> {
        let response = self.request_with_reauth(Method::GET, "/me/mailFolders", &[], None).await?;
        let folders = response
            .get("value")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(MailFolder::from_graph).collect())
            .unwrap_or_default();
        Ok(folders)
    }

    /// Flag a message as read.
    pub async fn mark_as_read(&self, message_id: &str) -> Result<(), ApiError> {
        let path = format!("/me/messages/{message_id}");
        let body = serde_json::json!({ "isRead": true });
        self.request_with_reauth(Method::PATCH, &path, &[], Some(&body)).await?;
        Ok(())
    }

    /// Cheap connectivity probe: can we fetch the profile right now?
    pub async fn test_connection(&self) -> bool {
        match self.get_user_profile().await {
            Ok(profile) => {
                debug!(user = %profile.display_name, "API connection test succeeded");
                true
            }
            Err(err) => {
                warn!(error = %err, "API connection test failed");
                false
            }
        }
    }
}

fn backoff_secs(attempt: u32, cap: u64) -> u64 {
    2u64.saturating_pow(attempt).min(cap)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    struct StaticTokenProvider {
        token: &'static str,
    }

    #[async_trait]
    impl AccessTokenProvider for StaticTokenProvider {
        async fn access_token(&self) -> Result<String, ApiError> {
            Ok(self.token.to_string())
        }
    }

    /// Provider whose first token is rejected; refresh swaps in a good one.
    struct RotatingProvider {
        refreshed: AtomicUsize,
    }

    #[async_trait]
    impl AccessTokenProvider for RotatingProvider {
        async fn access_token(&self) -> Result<String, ApiError> {
            if self.refreshed.load(Ordering::SeqCst) == 0 {
                Ok("token-stale".to_string())
            } else {
                Ok("token-fresh".to_string())
            }
        }

        async fn refresh_after_rejection(&self) -> bool {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    struct NoTokenProvider;

    #[async_trait]
    impl AccessTokenProvider for NoTokenProvider {
        async fn access_token(&self) -> Result<String, ApiError> {
            Err(ApiError::Unauthenticated)
        }
    }

    fn client_for(server: &MockServer, auth: Arc<dyn AccessTokenProvider>) -> GraphClient {
        GraphClient::with_config(
            auth,
            GraphClientConfig {
                base_url: server.uri(),
                timeout: Duration::from_secs(5),
                max_retries: 2,
            },
        )
    }

    fn message_json(id: &str, subject: Option<&str>) -> serde_json::Value {
        let mut message = serde_json::json!({
            "id": id,
            "from": {"emailAddress": {"name": "Alice Harbor", "address": "alice@example.com"}},
            "receivedDateTime": "2024-06-15T10:30:00Z",
            "bodyPreview": "preview",
            "isRead": false,
            "hasAttachments": true,
            "importance": "high"
        });
        if let Some(subject) = subject {
            message["subject"] = serde_json::json!(subject);
        }
        message
    }

    /// Validates that without a token no network call happens at all.
    #[tokio::test]
    async fn no_token_short_circuits_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let client = client_for(&server, Arc::new(NoTokenProvider));
        let err = client.request(Method::GET, "/me", &[], None).await.expect_err("must fail");
        assert!(matches!(err, ApiError::Unauthenticated));
    }

    /// Validates the 401 contract: immediate AuthExpired, exactly one
    /// request, no retries at the transport level.
    #[tokio::test]
    async fn unauthorized_fails_immediately_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        let err = client.request(Method::GET, "/me", &[], None).await.expect_err("must fail");
        assert!(matches!(err, ApiError::AuthExpired));
    }

    /// Validates 429 handling: the client sleeps for the Retry-After value
    /// and then succeeds.
    #[tokio::test]
    async fn rate_limit_honors_retry_after_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "1"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "u1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        let started = Instant::now();
        let value = client.request(Method::GET, "/me", &[], None).await.expect("success");

        assert_eq!(value["id"], "u1");
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    /// Validates that an exhausted 429 budget reports the attempt count.
    #[tokio::test]
    async fn rate_limit_exhaustion_reports_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        let err = client.request(Method::GET, "/me", &[], None).await.expect_err("must fail");
        match err {
            ApiError::RateLimited { attempts } => assert_eq!(attempts, 3),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    /// Validates 503 backoff followed by success.
    #[tokio::test]
    async fn service_unavailable_backs_off_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "u1"})))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        let started = Instant::now();
        let value = client.request(Method::GET, "/me", &[], None).await.expect("success");

        assert_eq!(value["id"], "u1");
        // First backoff step is 2^0 = 1 second.
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    /// Validates that other failure statuses carry status and body without
    /// retrying.
    #[tokio::test]
    async fn not_found_is_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/messages/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        let err = client
            .request(Method::GET, "/me/messages/gone", &[], None)
            .await
            .expect_err("must fail");
        match err {
            ApiError::ClientError { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "not found");
            }
            other => panic!("expected ClientError, got {other:?}"),
        }
    }

    /// Validates search: caps results below the server page, defaults the
    /// subject, normalizes sender and timestamp.
    #[tokio::test]
    async fn search_caps_results_and_normalizes_fields() {
        let server = MockServer::start().await;
        let page: Vec<serde_json::Value> = (0..12)
            .map(|i| message_json(&format!("m{i}"), if i == 0 { None } else { Some("Weekly") }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/me/messages"))
            .and(query_param("$top", "10"))
            .and(query_param("$orderby", "receivedDateTime desc"))
            .and(query_param("$search", "\"harbor report\""))
            .and(header("authorization", "Bearer t1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": page})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        let messages = client
            .search_messages("\"harbor report\"", None, 10)
            .await
            .expect("search");

        assert_eq!(messages.len(), 10);
        assert_eq!(messages[0].subject, "(No Subject)");
        assert_eq!(messages[0].sender, "Alice Harbor <alice@example.com>");
        assert_eq!(messages[0].received, "2024-06-15 10:30:00");
        assert!(messages[0].has_attachments);
        assert_eq!(messages[1].subject, "Weekly");
    }

    /// Validates that a rejected token triggers exactly one refresh and
    /// one repeat request at the operation level.
    #[tokio::test]
    async fn rejected_token_refreshes_once_and_repeats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/messages"))
            .and(header("authorization", "Bearer token-stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/messages"))
            .and(header("authorization", "Bearer token-fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"value": [message_json("m1", Some("After refresh"))]}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(RotatingProvider { refreshed: AtomicUsize::new(0) });
        let client = client_for(&server, provider.clone());

        let messages = client.search_messages("", None, 5).await.expect("search");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "After refresh");
        assert_eq!(provider.refreshed.load(Ordering::SeqCst), 1);
    }

    /// Validates message detail normalization including recipients and
    /// body.
    #[tokio::test]
    async fn message_details_include_recipients_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/messages/m42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m42",
                "subject": "Mooring invoice",
                "from": {"emailAddress": {"address": "billing@example.com"}},
                "toRecipients": [
                    {"emailAddress": {"name": "Bob", "address": "bob@example.com"}}
                ],
                "ccRecipients": [],
                "receivedDateTime": "2024-06-15T10:30:00Z",
                "sentDateTime": "2024-06-15T10:29:00Z",
                "body": {"contentType": "html", "content": "<p>Attached.</p>"},
                "bodyPreview": "Attached.",
                "isRead": true,
                "hasAttachments": true,
                "importance": "normal",
                "categories": ["finance"]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        let detail = client.get_message_details("m42").await.expect("details");

        assert_eq!(detail.subject, "Mooring invoice");
        assert_eq!(detail.sender, "billing@example.com");
        assert_eq!(detail.to, vec!["Bob <bob@example.com>".to_string()]);
        assert!(detail.cc.is_empty());
        assert_eq!(detail.body.content_type, "html");
        assert_eq!(detail.body.content, "<p>Attached.</p>");
        assert_eq!(detail.categories, vec!["finance".to_string()]);
    }

    /// Validates profile defaults when optional fields are missing.
    #[tokio::test]
    async fn user_profile_falls_back_to_principal_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "u1",
                "displayName": "Skipper",
                "userPrincipalName": "skipper@contoso.com"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        let profile = client.get_user_profile().await.expect("profile");

        assert_eq!(profile.display_name, "Skipper");
        assert_eq!(profile.mail, "skipper@contoso.com");
        assert!(client.test_connection().await);
    }

    /// Validates mark_as_read sends the PATCH body.
    #[tokio::test]
    async fn mark_as_read_patches_message() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/me/messages/m7"))
            .and(wiremock::matchers::body_json(serde_json::json!({"isRead": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m7"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokenProvider { token: "t1" }));
        client.mark_as_read("m7").await.expect("mark as read");
    }
}
