use anyhow::Result;
use axum::http::StatusCode;
use nortus_core::{Config, Environment};
use nortus_test::{fixtures::session_token, harness::TestApp};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

// ─── POST /auth/login ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_sets_session_cookie() -> Result<()> {
    let app = TestApp::new().await?;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "ana@nortus.io", "password": "s3cret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "abc"})))
        .expect(1)
        .mount(&app.upstream)
        .await;

    let response = app
        .post_json(
            "/auth/login",
            None,
            json!({"email": "ana@nortus.io", "password": "s3cret"}),
        )
        .await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body,
        json!({"user": {"name": "ana@nortus.io", "email": "ana@nortus.io"}})
    );

    let cookie = response.set_cookie().unwrap();
    assert!(cookie.starts_with("nortus_token=abc;"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=86400"));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(!cookie.contains("Secure"));

    Ok(())
}

#[tokio::test]
async fn test_login_cookie_is_secure_in_production() -> Result<()> {
    let mut config = Config::default();
    config.server.environment = Environment::Production;
    let app = TestApp::with_config(config).await?;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"accessToken": "prod"}})),
        )
        .mount(&app.upstream)
        .await;

    let response = app
        .post_json("/auth/login", None, json!({"email": "a@b.c", "password": "x"}))
        .await?;

    assert_eq!(response.status, StatusCode::OK);
    let cookie = response.set_cookie().unwrap();
    assert!(cookie.starts_with("nortus_token=prod;"));
    assert!(cookie.ends_with("; Secure"));

    Ok(())
}

#[tokio::test]
async fn test_login_rejection_forwards_upstream_status() -> Result<()> {
    let app = TestApp::new().await?;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid credentials"})),
        )
        .mount(&app.upstream)
        .await;

    let response = app
        .post_json("/auth/login", None, json!({"email": "a@b.c", "password": "bad"}))
        .await?;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body, json!({"message": "Invalid credentials"}));
    assert!(response.set_cookie().is_none());

    Ok(())
}

#[tokio::test]
async fn test_login_rejection_without_body() -> Result<()> {
    let app = TestApp::new().await?;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&app.upstream)
        .await;

    let response = app
        .post_json("/auth/login", None, json!({"email": "a@b.c", "password": "bad"}))
        .await?;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body, json!({"message": "Unauthorized"}));

    Ok(())
}

#[tokio::test]
async fn test_login_requires_both_fields() -> Result<()> {
    let app = TestApp::new().await?;

    for payload in [
        json!({"email": "a@b.c"}),
        json!({"email": "  ", "password": "x"}),
        json!({"email": "a@b.c", "password": ""}),
    ] {
        let response = app.post_json("/auth/login", None, payload).await?;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.body["message"].is_string());
    }

    assert_eq!(app.upstream_calls("/auth/login").await, 0);
    Ok(())
}

#[tokio::test]
async fn test_login_without_token_is_bad_gateway() -> Result<()> {
    let app = TestApp::new().await?;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&app.upstream)
        .await;

    let response = app
        .post_json("/auth/login", None, json!({"email": "a@b.c", "password": "x"}))
        .await?;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert!(response.set_cookie().is_none());

    Ok(())
}

#[tokio::test]
async fn test_login_rejects_token_that_breaks_cookie() -> Result<()> {
    let app = TestApp::new().await?;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "abc; Domain=evil.io"})),
        )
        .mount(&app.upstream)
        .await;

    let response = app
        .post_json("/auth/login", None, json!({"email": "a@b.c", "password": "x"}))
        .await?;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert!(response.set_cookie().is_none());

    Ok(())
}

// ─── POST /auth/logout ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_logout_clears_cookie() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app.post_json("/auth/logout", Some("abc"), json!({})).await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({"ok": true}));
    let cookie = response.set_cookie().unwrap();
    assert!(cookie.starts_with("nortus_token=;"));
    assert!(cookie.contains("Max-Age=0"));

    Ok(())
}

// ─── POST /auth/refresh ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_without_session() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app.request("POST", "/auth/refresh", None, None).await?;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body, json!({"message": "UNAUTHORIZED"}));
    assert_eq!(app.upstream_calls("/auth/refresh-token").await, 0);

    Ok(())
}

#[tokio::test]
async fn test_refresh_rotates_cookie() -> Result<()> {
    let app = TestApp::new().await?;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .and(body_json(json!({"access_token": "old"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "new"})))
        .expect(1)
        .mount(&app.upstream)
        .await;

    let response = app.request("POST", "/auth/refresh", Some("old"), None).await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({"ok": true}));
    assert!(response.set_cookie().unwrap().starts_with("nortus_token=new;"));

    Ok(())
}

#[tokio::test]
async fn test_refresh_failure_forwards_status_and_text() -> Result<()> {
    let app = TestApp::new().await?;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(403).set_body_string("token revoked"))
        .mount(&app.upstream)
        .await;

    let response = app.request("POST", "/auth/refresh", Some("old"), None).await?;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body, json!({"message": "token revoked"}));
    assert!(response.set_cookie().is_none());

    Ok(())
}

// ─── GET /auth/session ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_identity_from_token() -> Result<()> {
    let app = TestApp::new().await?;
    let token = session_token("maria@nortus.io", Some("Maria Souza"));

    let response = app.get("/auth/session", Some(&token)).await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body,
        json!({"user": {"email": "maria@nortus.io", "name": "Maria Souza", "initials": "MS"}})
    );

    Ok(())
}

#[tokio::test]
async fn test_session_initials_from_email() -> Result<()> {
    let app = TestApp::new().await?;
    let token = session_token("joao.silva@nortus.io", None);

    let response = app.get("/auth/session", Some(&token)).await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["user"]["initials"], "JS");
    assert!(response.body["user"]["name"].is_null());

    Ok(())
}

#[tokio::test]
async fn test_session_rejects_missing_or_opaque_token() -> Result<()> {
    let app = TestApp::new().await?;

    let missing = app.get("/auth/session", None).await?;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let opaque = app.get("/auth/session", Some("not-a-jwt")).await?;
    assert_eq!(opaque.status, StatusCode::UNAUTHORIZED);

    Ok(())
}
