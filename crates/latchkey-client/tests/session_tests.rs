//! Session client tests against a mock API server

use latchkey_client::{ClientConfig, SessionClient};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_ID: &str = "550e8400-e29b-41d4-a716-446655440000";

fn session_body(access_token: &str) -> Value {
    json!({
        "accessToken": access_token,
        "refreshToken": "not-for-script",
        "user": {
            "id": USER_ID,
            "username": "alice",
            "email": "alice@x.com",
            "roles": ["user"],
            "avatarUrl": null,
            "externalId": null
        }
    })
}

fn profile_body() -> Value {
    json!({
        "id": USER_ID,
        "username": "alice",
        "email": "alice@x.com",
        "roles": ["user"],
        "avatarUrl": null,
        "externalId": null,
        "lastLoginProvider": "local",
        "createdAt": "2026-01-01T00:00:00Z",
        "updatedAt": "2026-01-01T00:00:00Z"
    })
}

fn unauthorized() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({
        "code": "UNAUTHORIZED",
        "message": "Invalid or expired token"
    }))
}

fn session_response(access_token: &str, refresh_cookie: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header(
            "set-cookie",
            format!("refreshToken={refresh_cookie}; Max-Age=2592000; Path=/; HttpOnly; SameSite=Lax")
                .as_str(),
        )
        .set_body_json(session_body(access_token))
}

fn client_for(server: &MockServer, token_file: Option<std::path::PathBuf>) -> SessionClient {
    SessionClient::new(ClientConfig {
        base_url: format!("{}/api", server.uri()),
        token_file,
        cookie_file: None,
        timeout_secs: 5,
    })
    .unwrap()
}

fn persistent_client_for(server: &MockServer, dir: &TempDir) -> SessionClient {
    SessionClient::new(ClientConfig {
        base_url: format!("{}/api", server.uri()),
        token_file: Some(dir.path().join("token")),
        cookie_file: Some(dir.path().join("cookies")),
        timeout_secs: 5,
    })
    .unwrap()
}

async fn mount_signin(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/signin"))
        .and(body_json(json!({"username": "alice", "password": "secret1"})))
        .respond_with(session_response(access_token, "r1"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_stores_access_token() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;

    let client = client_for(&server, None);
    let user = client.login("alice", "secret1", false).await.unwrap();

    assert_eq!(user.username, "alice");
    assert_eq!(client.access_token().await.unwrap().as_deref(), Some("old"));
    assert!(client.is_authenticated().await.unwrap());
}

#[tokio::test]
async fn test_failed_login_keeps_no_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/signin"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "INVALID_CREDENTIALS",
            "message": "Invalid username or password"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let err = client.login("alice", "wrong", false).await.unwrap_err();

    match err {
        latchkey_client::ClientError::Http { status, code, .. } => {
            assert_eq!(status, 400);
            assert_eq!(code.as_deref(), Some("INVALID_CREDENTIALS"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!client.is_authenticated().await.unwrap());
}

#[tokio::test]
async fn test_401_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;

    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", "Bearer old"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;
    // The cookie jar carries the refresh token set at login
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .and(header("cookie", "refreshToken=r1"))
        .respond_with(session_response("new", "r2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    client.login("alice", "secret1", false).await.unwrap();

    let profile = client.me().await.unwrap();
    assert_eq!(profile.username, "alice");
    assert_eq!(profile.last_login_provider, "local");
    assert_eq!(client.access_token().await.unwrap().as_deref(), Some("new"));
}

#[tokio::test]
async fn test_refresh_failure_discards_token_and_returns_original_error() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;

    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "UNAUTHORIZED",
            "message": "Refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    client.login("alice", "secret1", false).await.unwrap();

    let err = client.me().await.unwrap_err();
    assert!(err.is_unauthorized());
    // The error is the original call's, not the refresh's
    assert_eq!(err.to_string(), "HTTP 401: Invalid or expired token");
    assert_eq!(client.access_token().await.unwrap(), None);
}

#[tokio::test]
async fn test_second_401_is_not_retried() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;

    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(unauthorized())
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .respond_with(session_response("new", "r2"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    client.login("alice", "secret1", false).await.unwrap();

    let err = client.me().await.unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_non_401_errors_pass_through() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "FORBIDDEN",
            "message": "Insufficient permissions"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .respond_with(session_response("new", "r2"))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    client.login("alice", "secret1", false).await.unwrap();

    let err = client.users().await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(403));
    assert_eq!(client.access_token().await.unwrap().as_deref(), Some("old"));
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;

    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", "Bearer old"))
        .respond_with(unauthorized())
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .respond_with(session_response("new", "r2").set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    client.login("alice", "secret1", false).await.unwrap();

    let (a, b) = tokio::join!(client.me(), client.me());
    assert!(a.is_ok(), "{a:?}");
    assert!(b.is_ok(), "{b:?}");
    assert_eq!(client.access_token().await.unwrap().as_deref(), Some("new"));
}

#[tokio::test]
async fn test_remember_me_persists_across_clients() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;
    let dir = TempDir::new().unwrap();
    let token_file = dir.path().join("token");

    let client = client_for(&server, Some(token_file.clone()));
    client.login("alice", "secret1", true).await.unwrap();
    assert!(token_file.exists());

    let restarted = client_for(&server, Some(token_file.clone()));
    assert_eq!(
        restarted.access_token().await.unwrap().as_deref(),
        Some("old")
    );

    // Logging in without remember-me moves the token to memory
    restarted.login("alice", "secret1", false).await.unwrap();
    assert!(!token_file.exists());
    assert_eq!(
        restarted.access_token().await.unwrap().as_deref(),
        Some("old")
    );
}

#[tokio::test]
async fn test_refresh_keeps_remembered_slot() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .respond_with(session_response("new", "r2"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let token_file = dir.path().join("token");

    let client = client_for(&server, Some(token_file.clone()));
    client.login("alice", "secret1", true).await.unwrap();
    client.refresh().await.unwrap();

    let stored = std::fs::read_to_string(&token_file).unwrap();
    assert_eq!(stored, "new");
}

#[tokio::test]
async fn test_remembered_session_refreshes_in_new_process() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", "Bearer old"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .and(header("cookie", "refreshToken=r1"))
        .respond_with(session_response("new", "r2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    persistent_client_for(&server, &dir)
        .login("alice", "secret1", true)
        .await
        .unwrap();
    assert!(dir.path().join("cookies").exists());

    // A fresh client only has the files to go on
    let restarted = persistent_client_for(&server, &dir);
    let profile = restarted.me().await.unwrap();
    assert_eq!(profile.username, "alice");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("cookies")).unwrap(),
        "refreshToken=r2"
    );
}

#[tokio::test]
async fn test_session_only_login_keeps_no_cookie_file() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;
    Mock::given(method("GET"))
        .and(path("/api/logout"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "Logged out successfully"})),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let cookies = dir.path().join("cookies");

    let client = persistent_client_for(&server, &dir);
    client.login("alice", "secret1", false).await.unwrap();
    assert!(!cookies.exists());

    client.login("alice", "secret1", true).await.unwrap();
    assert!(cookies.exists());

    client.logout().await.unwrap();
    assert!(!cookies.exists());
}

#[tokio::test]
async fn test_check_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .respond_with(unauthorized())
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/refresh"))
        .respond_with(session_response("restored", "r2"))
        .mount(&server)
        .await;

    let client = client_for(&server, None);

    // No usable cookie yet
    assert_eq!(client.check_auth().await.unwrap(), None);
    assert!(!client.is_authenticated().await.unwrap());

    let user = client.check_auth().await.unwrap().unwrap();
    assert_eq!(user.username, "alice");
    assert_eq!(
        client.access_token().await.unwrap().as_deref(),
        Some("restored")
    );
}

#[tokio::test]
async fn test_logout_forgets_token_even_on_failure() {
    let server = MockServer::start().await;
    mount_signin(&server, "old").await;
    Mock::given(method("GET"))
        .and(path("/api/logout"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": "INTERNAL_ERROR",
            "message": "Internal server error"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    client.login("alice", "secret1", false).await.unwrap();

    assert!(client.logout().await.is_err());
    assert_eq!(client.access_token().await.unwrap(), None);
}

#[tokio::test]
async fn test_password_reset_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/forgot-password"))
        .and(body_json(json!({"email": "alice@x.com"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "If an account with that email exists, password reset instructions have been sent",
            "resetToken": "tok"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/reset-password"))
        .and(body_json(json!({"token": "tok", "password": "newsecret"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "Password has been reset"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let requested = client.forgot_password("alice@x.com").await.unwrap();
    assert_eq!(requested.reset_token.as_deref(), Some("tok"));

    let done = client.reset_password("tok", "newsecret").await.unwrap();
    assert_eq!(done.message, "Password has been reset");
}
