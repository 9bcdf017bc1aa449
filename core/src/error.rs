use thiserror::Error;

/// Failures raised by the proxy core.
///
/// Upstream error *statuses* are not errors here: a 4xx/5xx reply from the
/// upstream is an [`UpstreamResponse`](crate::upstream::UpstreamResponse) and
/// is forwarded as-is. Only conditions the proxy itself detects live here.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No session cookie on the inbound request.
    #[error("UNAUTHORIZED")]
    Unauthenticated,

    /// The upstream rejected the token and it could not be refreshed.
    #[error("Unauthorized")]
    Unauthorized,

    /// The refresh endpoint answered with a non-2xx status or no usable token.
    #[error("token refresh failed")]
    RefreshFailed { status: Option<u16>, body: String },

    /// DNS, connect, timeout or reset while talking to the upstream.
    #[error("upstream unavailable: {0}")]
    Transport(String),

    /// A 2xx upstream reply whose body is not JSON.
    #[error("upstream returned a malformed response")]
    MalformedResponse(String),

    /// One leg of a fan-out query failed.
    #[error("{0}")]
    Aggregation(String),

    #[error("{0}")]
    InvalidRequest(String),
}

impl ProxyError {
    /// Message suitable for a `{"message": ...}` error body.
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::RefreshFailed { body, .. } if !body.trim().is_empty() => body.clone(),
            ProxyError::RefreshFailed { .. } => "Request failed".to_string(),
            ProxyError::MalformedResponse(raw) if !raw.trim().is_empty() => raw.clone(),
            ProxyError::Transport(_) => "Upstream request failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Transport(err.to_string())
    }
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;
