#![allow(clippy::unwrap_used)]
// Integration tests for the portal and consumer-app auth flows using wiremock.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use onecta_api::auth::AuthEvent;
use onecta_api::{
    AppAuth, AppConfig, AppEndpoints, AuthMode, AuthProvider, Error, PortalAuth, PortalConfig,
    PortalEndpoints, TokenSet, TokenStore, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn token_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

async fn setup_portal() -> (MockServer, PortalAuth, TempDir) {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut config = PortalConfig::new(
        "client-1",
        SecretString::from("secret-1"),
        "https://localhost/callback",
    )
    .unwrap();
    config.endpoints = PortalEndpoints::with_base(&format!("{}/oidc", server.uri())).unwrap();

    let auth = PortalAuth::new(
        config,
        TokenStore::new(dir.path().join("portal-tokens.json")),
        &TransportConfig::default(),
    )
    .unwrap();
    (server, auth, dir)
}

/// Seed the token file with an already-expired record so the next
/// `access_token` call must refresh.
async fn seed_expired(dir: &TempDir, name: &str) {
    let mut tokens = TokenSet::bearer("stale", Some(1)).with_refresh_token("refresh-0");
    tokens.normalize(chrono::Utc::now() - chrono::Duration::seconds(60));
    TokenStore::new(dir.path().join(name))
        .save(&tokens)
        .await
        .unwrap();
}

// ── Portal flow ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_portal_exchange_persists_and_announces() {
    let (server, auth, dir) = setup_portal().await;
    let mut events = auth.subscribe();

    Mock::given(method("POST"))
        .and(path("/oidc/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .and(body_string_contains("client_secret=secret-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", Some("r1"))))
        .expect(1)
        .mount(&server)
        .await;

    let before = chrono::Utc::now();
    let tokens = auth.exchange_code("the-code").await.unwrap();
    let expires_at = tokens.expires_at.unwrap();
    assert!(expires_at >= before + chrono::Duration::seconds(3600));

    assert!(auth.is_authenticated().await);
    assert_eq!(auth.access_token().await.unwrap().expose_secret(), "a1");
    assert_eq!(auth.token_expiration().await, Some(expires_at));

    let stored = TokenStore::new(dir.path().join("portal-tokens.json"))
        .load()
        .await
        .unwrap();
    assert_eq!(stored.expires_at, Some(expires_at));

    assert_eq!(
        events.recv().await.unwrap(),
        AuthEvent::TokenChanged {
            mode: AuthMode::Portal,
            expires_at: Some(expires_at),
        }
    );
}

#[tokio::test]
async fn test_portal_exchange_rejected() {
    let (server, auth, _dir) = setup_portal().await;

    Mock::given(method("POST"))
        .and(path("/oidc/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "code expired"
        })))
        .mount(&server)
        .await;

    let err = auth.exchange_code("old-code").await.unwrap_err();
    assert!(matches!(err, Error::AuthFailed { ref message } if message.contains("code expired")));
    assert!(!auth.is_authenticated().await);
}

#[tokio::test]
async fn test_portal_refreshes_expired_token_and_keeps_refresh_token() {
    let (server, auth, dir) = setup_portal().await;
    seed_expired(&dir, "portal-tokens.json").await;

    Mock::given(method("POST"))
        .and(path("/oidc/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-0"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Flocalhost%2Fcallback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", None)))
        .expect(1)
        .mount(&server)
        .await;

    let token = auth.access_token().await.unwrap();
    assert_eq!(token.expose_secret(), "a2");

    let stored = TokenStore::new(dir.path().join("portal-tokens.json"))
        .load()
        .await
        .unwrap();
    assert_eq!(stored.access_token.expose_secret(), "a2");
    assert_eq!(
        stored.refresh_token.unwrap().expose_secret(),
        "refresh-0",
        "refresh token survives a response without one"
    );
}

#[tokio::test]
async fn test_concurrent_refresh_issues_one_request() {
    let (server, auth, dir) = setup_portal().await;
    seed_expired(&dir, "portal-tokens.json").await;

    Mock::given(method("POST"))
        .and(path("/oidc/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("shared", Some("r2")))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let auth = Arc::new(auth);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let auth = Arc::clone(&auth);
        handles.push(tokio::spawn(async move { auth.refresh_token().await }));
    }

    for handle in handles {
        let tokens = handle.await.unwrap().unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "shared");
    }
    // `expect(1)` is verified when the server drops.
}

#[tokio::test]
async fn test_concurrent_refresh_failure_reaches_everyone() {
    let (server, auth, dir) = setup_portal().await;
    seed_expired(&dir, "portal-tokens.json").await;
    let mut events = auth.subscribe();

    Mock::given(method("POST"))
        .and(path("/oidc/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "error": "invalid_grant" }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (a, b) = tokio::join!(auth.refresh_token(), auth.refresh_token());
    for result in [a, b] {
        assert!(matches!(
            result,
            Err(Error::RefreshFailed {
                invalid_grant: true,
                ..
            })
        ));
    }

    assert!(matches!(
        events.recv().await.unwrap(),
        AuthEvent::RefreshFailed {
            invalid_grant: true,
            ..
        }
    ));
}

#[tokio::test]
async fn test_missing_credentials_require_auth() {
    let (_server, auth, _dir) = setup_portal().await;
    assert!(matches!(auth.access_token().await, Err(Error::AuthRequired)));
    assert!(matches!(
        auth.refresh_token().await,
        Err(Error::RefreshFailed { .. })
    ));
}

#[tokio::test]
async fn test_stored_record_with_huge_lifetime_is_usable() {
    let (_server, auth, dir) = setup_portal().await;
    std::fs::write(
        dir.path().join("portal-tokens.json"),
        r#"{"access_token":"a","token_type":"Bearer","expires_in":18446744073709551615}"#,
    )
    .unwrap();

    let token = auth.access_token().await.unwrap();
    assert_eq!(token.expose_secret(), "a");
    assert!(auth.is_authenticated().await);
    assert_eq!(
        auth.token_expiration().await,
        Some(chrono::DateTime::<chrono::Utc>::MAX_UTC)
    );
}

#[tokio::test]
async fn test_revoke_clears_even_when_server_fails() {
    let (server, auth, dir) = setup_portal().await;
    seed_expired(&dir, "portal-tokens.json").await;

    Mock::given(method("POST"))
        .and(path("/oidc/revoke"))
        .and(body_string_contains("token=refresh-0"))
        .and(body_string_contains("token_type_hint=refresh_token"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    auth.revoke().await.unwrap();
    assert!(!auth.is_authenticated().await);
    assert!(!dir.path().join("portal-tokens.json").exists());
}

// ── Consumer-app flow ───────────────────────────────────────────────

async fn setup_app() -> (MockServer, AppAuth, TempDir) {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut config = AppConfig::new("app-client", SecretString::from("app-secret"), "API_KEY")
        .unwrap();
    config.redirect_uri = "daikinunified://cdc/".into();
    config.endpoints = AppEndpoints::with_bases(
        &format!("{}/idp", server.uri()),
        &format!("{}/cdc", server.uri()),
        "API_KEY",
    )
    .unwrap();

    let auth = AppAuth::new(
        config,
        TokenStore::new(dir.path().join("app-tokens.json")),
        &TransportConfig::default(),
    )
    .unwrap();
    (server, auth, dir)
}

async fn mount_login_steps(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/idp/authorize"))
        .and(query_param("code_challenge_method", "S256"))
        .and(query_param("client_id", "app-client"))
        .respond_with(ResponseTemplate::new(302).insert_header(
            "Location",
            format!("{}/cdc/login?context=ctx-42&client_id=app-client", server.uri()),
        ))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cdc/accounts.webSdkBootstrap"))
        .and(query_param("apiKey", "API_KEY"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "gmid=abc; Path=/")
                .set_body_json(json!({ "errorCode": 0 })),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_app_login_runs_all_steps() {
    let (server, auth, dir) = setup_app().await;
    mount_login_steps(&server).await;

    Mock::given(method("POST"))
        .and(path("/cdc/accounts.login"))
        .and(body_string_contains("loginID=user%40example.com"))
        .and(body_string_contains("riskContext="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorCode": 0,
            "sessionInfo": { "login_token": "lt-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cdc/oidc/op/v1.0/API_KEY/authorize/continue"))
        .and(query_param("context", "ctx-42"))
        .and(query_param("login_token", "lt-1"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "daikinunified://cdc/?code=auth-code-1"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/idp/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("app-a1", Some("app-r1"))))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = auth
        .authenticate("user@example.com", &SecretString::from("hunter2"))
        .await
        .unwrap();
    assert_eq!(tokens.access_token.expose_secret(), "app-a1");
    assert_eq!(auth.mode(), AuthMode::App);
    assert!(dir.path().join("app-tokens.json").exists());
}

#[tokio::test]
async fn test_app_login_rejected_names_step() {
    let (server, auth, dir) = setup_app().await;
    mount_login_steps(&server).await;

    Mock::given(method("POST"))
        .and(path("/cdc/accounts.login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorCode": 403042,
            "errorMessage": "Invalid LoginID",
            "errorDetails": "invalid loginID or password"
        })))
        .mount(&server)
        .await;

    let err = auth
        .authenticate("user@example.com", &SecretString::from("wrong"))
        .await
        .unwrap_err();
    match err {
        Error::AuthFailed { message } => {
            assert!(message.starts_with("step 3 (login)"), "{message}");
            assert!(message.contains("invalid loginID or password"));
        }
        other => panic!("expected AuthFailed, got {other:?}"),
    }
    assert!(!dir.path().join("app-tokens.json").exists());
}

#[tokio::test]
async fn test_app_authorize_without_redirect_fails_at_step_one() {
    let (server, auth, _dir) = setup_app().await;

    Mock::given(method("GET"))
        .and(path("/idp/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = auth
        .authenticate("user@example.com", &SecretString::from("pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthFailed { ref message } if message.starts_with("step 1")));
}

#[tokio::test]
async fn test_app_refresh_uses_basic_auth() {
    let (server, auth, dir) = setup_app().await;
    seed_expired(&dir, "app-tokens.json").await;

    Mock::given(method("POST"))
        .and(path("/idp/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("app-a2", Some("app-r2"))))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(auth.access_token().await.unwrap().expose_secret(), "app-a2");
}
