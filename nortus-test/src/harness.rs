use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use nortus::server::build_router;
use nortus_core::{Config, HttpUpstream};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::MockServer;

/// The proxy router wired to a `wiremock` server standing in for the upstream API.
pub struct TestApp {
    router: Router,
    pub upstream: MockServer,
    pub config: Config,
}

/// What the router answered.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
    /// Parsed body, `Null` when it is not JSON.
    pub body: Value,
}

impl TestResponse {
    pub fn set_cookie(&self) -> Option<&str> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_config(Config::default()).await
    }

    pub async fn with_config(mut config: Config) -> Result<Self> {
        let upstream = MockServer::start().await;
        config.upstream.base_url = upstream.uri();
        config.server.cors_enabled = false;
        config.server.verbose = false;

        let client = HttpUpstream::new(&config.upstream).context("upstream client")?;
        let router = build_router(&config, Arc::new(client));

        Ok(Self {
            router,
            upstream,
            config,
        })
    }

    /// `Cookie` header value carrying `token` as the session.
    pub fn session_cookie(&self, token: &str) -> String {
        format!("{}={}", self.config.session.cookie_name, token)
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<TestResponse> {
        self.request("GET", path, token, None).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        token: Option<&str>,
        payload: Value,
    ) -> Result<TestResponse> {
        self.request("POST", path, token, Some(payload)).await
    }

    pub async fn patch_json(
        &self,
        path: &str,
        token: Option<&str>,
        payload: Value,
    ) -> Result<TestResponse> {
        self.request("PATCH", path, token, Some(payload)).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<TestResponse> {
        self.request("DELETE", path, token, None).await
    }

    pub async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        payload: Option<Value>,
    ) -> Result<TestResponse> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, self.session_cookie(token));
        }

        let body = match payload {
            Some(payload) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&payload)?)
            }
            None => Body::empty(),
        };

        self.execute(builder.body(body)?).await
    }

    pub async fn execute(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("router execution failed")?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await?.to_bytes();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        Ok(TestResponse {
            status,
            headers,
            text,
            body,
        })
    }

    /// Upstream requests received so far whose path is `path`.
    pub async fn upstream_calls(&self, path: &str) -> usize {
        self.upstream
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == path)
            .count()
    }
}
