//! End-to-end flow: interactive login through the loopback receiver,
//! token persistence, then an authenticated mailbox search, with both the
//! identity provider and the Graph API played by mock servers.

use std::sync::Arc;
use std::time::Duration;

use mailhelm_common::testing::MemoryKeychain;
use mailhelm_common::{OAuthClient, OAuthConfig, TokenStore};
use mailhelm_infra::session::BrowserLauncher;
use mailhelm_infra::{AuthSession, GraphClient, GraphClientConfig};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("probe bind");
    listener.local_addr().expect("local addr").port()
}

/// Browser double: follows the authorization URL's redirect_uri back with
/// a code and the issued state, like a user approving consent.
fn approving_browser() -> BrowserLauncher {
    Box::new(|auth_url: &str| {
        let parsed = url::Url::parse(auth_url).expect("authorization url");
        let mut redirect = None;
        let mut state = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "redirect_uri" => redirect = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }
        let callback = format!(
            "{}?code=integration-code&state={}",
            redirect.expect("redirect_uri param"),
            state.expect("state param")
        );
        tokio::spawn(async move {
            let _ = reqwest::get(&callback).await;
        });
        Ok(())
    })
}

#[tokio::test]
async fn login_then_search_round_trip() {
    let _ = tracing_subscriber::fmt().with_env_filter("mailhelm_infra=debug").try_init();

    let identity = MockServer::start().await;
    let graph = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=integration-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-e2e",
            "refresh_token": "rt-e2e",
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "Mail.Read offline_access"
        })))
        .expect(1)
        .mount(&identity)
        .await;

    Mock::given(method("GET"))
        .and(path("/me/messages"))
        .and(header("authorization", "Bearer at-e2e"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{
                "id": "m1",
                "subject": "Charter confirmation",
                "from": {"emailAddress": {"name": "Marina", "address": "marina@example.com"}},
                "receivedDateTime": "2024-06-15T08:00:00Z",
                "bodyPreview": "Your berth is confirmed.",
                "isRead": false,
                "hasAttachments": false,
                "importance": "normal"
            }]
        })))
        .expect(1)
        .mount(&graph)
        .await;

    let port = free_port().await;
    let keychain = MemoryKeychain::new();
    let oauth = OAuthClient::new(OAuthConfig {
        client_id: "client-e2e".into(),
        redirect_uri: format!("http://localhost:{port}/"),
        scopes: vec!["Mail.Read".into(), "offline_access".into()],
        authorize_endpoint: format!("{}/authorize", identity.uri()),
        token_endpoint: format!("{}/token", identity.uri()),
    });
    let session = Arc::new(
        AuthSession::new(oauth, TokenStore::new(keychain.clone(), "default"), port)
            .with_browser_launcher(approving_browser()),
    );

    // Interactive login via the loopback receiver.
    let record = session.login(Duration::from_secs(5)).await.expect("login");
    assert_eq!(record.access_token, "at-e2e");
    assert!(session.is_authenticated());

    // The persisted record is what a fresh session would see.
    let stored = TokenStore::new(keychain, "default").load().expect("load").expect("present");
    assert_eq!(stored.access_token, "at-e2e");

    // Authenticated search through the session's token.
    let client = GraphClient::with_config(
        session.clone(),
        GraphClientConfig {
            base_url: graph.uri(),
            timeout: Duration::from_secs(5),
            max_retries: 1,
        },
    );
    let messages = client.search_messages("charter", None, 10).await.expect("search");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].subject, "Charter confirmation");
    assert_eq!(messages[0].sender, "Marina <marina@example.com>");

    // Logout drops the token; the next call cannot authenticate.
    session.logout().expect("logout");
    assert!(!session.is_authenticated());
    assert!(session.get_access_token().await.is_none());
}
