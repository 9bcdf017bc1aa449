use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
};
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::{ProxyError, ProxyResult};

pub use reqwest::Method;

/// A call to make against the upstream API.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl UpstreamRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_body(value.to_string())
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// What came back, uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Parse the body as JSON. An empty body is `null`.
    pub fn json(&self) -> Option<serde_json::Value> {
        if self.body.trim().is_empty() {
            return Some(serde_json::Value::Null);
        }
        serde_json::from_str(&self.body).ok()
    }
}

/// Transport to the upstream API.
///
/// Implementations never look at the status code; that is the
/// [`RefreshRetry`](crate::refresh::RefreshRetry) engine's job.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn call(
        &self,
        request: &UpstreamRequest,
        token: Option<&str>,
    ) -> ProxyResult<UpstreamResponse>;
}

/// `reqwest`-backed upstream client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    base_url: String,
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> ProxyResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(request: &UpstreamRequest, token: Option<&str>) -> ProxyResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::InvalidRequest(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProxyError::InvalidRequest(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        if !request.has_header(ACCEPT.as_str()) {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }

        if let Some(token) = token {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| ProxyError::InvalidRequest("token is not a valid header".into()))?;
            headers.insert(AUTHORIZATION, bearer);
        }

        if request.body.is_some() && !request.has_header(CONTENT_TYPE.as_str()) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        Ok(headers)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn call(
        &self,
        request: &UpstreamRequest,
        token: Option<&str>,
    ) -> ProxyResult<UpstreamResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(method = %request.method, url = %url, authenticated = token.is_some(), "upstream call");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(Self::headers(request, token)?);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        debug!(status, bytes = body.len(), "upstream replied");
        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
