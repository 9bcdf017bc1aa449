use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use nortus_core::{ProxyError, UpstreamResponse};
use serde_json::{json, Value};
use thiserror::Error;

/// Anything a route handler can fail with.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// A non-2xx upstream reply, forwarded with its own status.
    #[error("upstream answered {status}")]
    Upstream { status: u16, body: Value },
}

impl AppError {
    /// Forward a failed upstream reply: its JSON body, or its text wrapped in
    /// `{"message"}`.
    pub fn upstream(response: UpstreamResponse) -> Self {
        let body = match response.json() {
            Some(value) if !value.is_null() => value,
            _ => message_body(fallback(&response.body, "Request failed")),
        };
        AppError::Upstream {
            status: response.status,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Upstream { status, .. } => status_code(*status),
            AppError::Proxy(err) => match err {
                ProxyError::Unauthenticated | ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
                ProxyError::RefreshFailed {
                    status: Some(status),
                    ..
                } => status_code(*status),
                ProxyError::RefreshFailed { status: None, .. } => StatusCode::UNAUTHORIZED,
                ProxyError::Transport(_) | ProxyError::MalformedResponse(_) => {
                    StatusCode::BAD_GATEWAY
                }
                ProxyError::Aggregation(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Upstream { body, .. } => body,
            AppError::Proxy(err) => message_body(&err.public_message()),
        };

        (status, Json(body)).into_response()
    }
}

/// Map an upstream status onto ours; unrepresentable codes become 502.
pub fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

pub fn message_body(message: &str) -> Value {
    json!({ "message": message })
}

fn fallback<'a>(text: &'a str, default: &'a str) -> &'a str {
    let text = text.trim();
    if text.is_empty() {
        default
    } else {
        text
    }
}
