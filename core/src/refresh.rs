//! Retry-once-on-401 around the upstream client.
//!
//! Every authenticated call goes through [`RefreshRetry::execute`], which is
//! terminal in at most two resource calls and one refresh call:
//!
//! ```text
//! NoToken ──────────────────────────────► Unauthenticated
//! FirstAttempt ── status != 401 ────────► response
//!      │ 401
//!      ▼
//! Refreshing ──── refresh failed ───────► Unauthorized (cookie untouched)
//!      │ new token persisted
//!      ▼
//! SecondAttempt ─────────────────────────► response (even a second 401)
//! ```

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::normalize::{self, aliases};
use crate::session::SessionStore;
use crate::upstream::{Method, Upstream, UpstreamRequest, UpstreamResponse};

enum Step {
    FirstAttempt(String),
    Refreshing(String),
    SecondAttempt(String),
}

/// The refresh-retry engine. Cheap to share; holds no per-request state.
#[derive(Clone)]
pub struct RefreshRetry {
    upstream: Arc<dyn Upstream>,
    refresh_path: String,
    session_ttl: Duration,
}

impl RefreshRetry {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        refresh_path: impl Into<String>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            upstream,
            refresh_path: refresh_path.into(),
            session_ttl,
        }
    }

    /// The wrapped client, for unauthenticated calls such as login.
    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Run `request` with the session's token, refreshing and retrying once on 401.
    pub async fn execute<S>(
        &self,
        session: &mut S,
        request: &UpstreamRequest,
    ) -> ProxyResult<UpstreamResponse>
    where
        S: SessionStore + ?Sized,
    {
        let Some(token) = session.token() else {
            return Err(ProxyError::Unauthenticated);
        };

        let mut step = Step::FirstAttempt(token);
        loop {
            step = match step {
                Step::FirstAttempt(token) => {
                    let response = self.upstream.call(request, Some(&token)).await?;
                    if !response.is_unauthorized() {
                        return Ok(response);
                    }
                    Step::Refreshing(token)
                }
                Step::Refreshing(token) => match self.refresh(&token).await {
                    Ok(next) => {
                        info!(path = %request.path, "session token refreshed");
                        session.set_token(next.clone(), self.session_ttl);
                        Step::SecondAttempt(next)
                    }
                    Err(ProxyError::RefreshFailed { status, .. }) => {
                        warn!(path = %request.path, ?status, "token refresh failed");
                        return Err(ProxyError::Unauthorized);
                    }
                    Err(other) => return Err(other),
                },
                Step::SecondAttempt(token) => {
                    return self.upstream.call(request, Some(&token)).await;
                }
            };
        }
    }

    /// Exchange `token` for a new one. Does not touch any session.
    pub async fn refresh(&self, token: &str) -> ProxyResult<String> {
        let request = UpstreamRequest::new(Method::POST, self.refresh_path.clone())
            .with_json(&json!({ "access_token": token }));

        let response = self.upstream.call(&request, None).await?;
        if !response.is_success() {
            return Err(ProxyError::RefreshFailed {
                status: Some(response.status),
                body: response.body,
            });
        }

        response
            .json()
            .as_ref()
            .and_then(extract_access_token)
            .ok_or_else(|| ProxyError::RefreshFailed {
                status: None,
                body: "refresh response carried no access token".to_string(),
            })
    }
}

/// Read a non-empty access token from a login or refresh payload.
///
/// Tokens that could not be stored verbatim as a cookie value are rejected.
pub fn extract_access_token(payload: &Value) -> Option<String> {
    let read = |value: &Value| {
        normalize::pick_value(value, aliases::ACCESS_TOKEN)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty() && t.bytes().all(is_cookie_octet))
            .map(str::to_string)
    };

    read(payload).or_else(|| read(normalize::unwrap_envelope(payload)))
}

/// RFC 6265 `cookie-octet`.
fn is_cookie_octet(byte: u8) -> bool {
    matches!(byte, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
}
