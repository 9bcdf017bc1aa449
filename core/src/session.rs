//! Session store backed by a single HTTP-only cookie.
//!
//! The token never leaves the cookie jar on the browser side: it is read from
//! the inbound `Cookie` header, handed to the refresh-retry engine for the
//! duration of one request, and written back through `Set-Cookie` only when
//! login, refresh or logout changed it.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

/// Per-request access to the session token.
pub trait SessionStore: Send {
    /// Current token, `None` when the browser holds no session.
    fn token(&self) -> Option<String>;

    /// Replace the token and schedule a cookie with a fresh max-age.
    fn set_token(&mut self, token: String, ttl: Duration);

    /// Drop the token and schedule a clearing cookie.
    fn clear(&mut self);
}

/// Fixed cookie attributes, shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub max_age: Duration,
    pub secure: bool,
}

impl CookieSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.session.cookie_name.clone(),
            max_age: config.session.ttl(),
            secure: config.session.is_secure(config.server.environment),
        }
    }

    /// Extract this cookie's value from a `Cookie` request header.
    pub fn read(&self, cookie_header: &str) -> Option<String> {
        cookie_header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| name.trim() == self.name)
            .map(|(_, value)| value.trim().trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    }

    /// `Set-Cookie` value storing `token` for `ttl`.
    pub fn set_cookie(&self, token: &str, ttl: Duration) -> String {
        let expires = Utc::now() + ChronoDuration::seconds(ttl.as_secs() as i64);
        self.render(
            token,
            ttl.as_secs(),
            &expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        )
    }

    /// `Set-Cookie` value that removes the session.
    pub fn clearing_cookie(&self) -> String {
        self.render("", 0, "Thu, 01 Jan 1970 00:00:00 GMT")
    }

    fn render(&self, value: &str, max_age: u64, expires: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; Expires={}; HttpOnly; SameSite=Lax",
            self.name, value, max_age, expires
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CookieUpdate {
    Set { token: String, ttl: Duration },
    Clear,
}

/// Session state for one inbound request.
#[derive(Debug, Clone)]
pub struct RequestSession {
    settings: Arc<CookieSettings>,
    token: Option<String>,
    update: Option<CookieUpdate>,
}

impl RequestSession {
    pub fn new(settings: Arc<CookieSettings>, token: Option<String>) -> Self {
        Self {
            settings,
            token,
            update: None,
        }
    }

    /// Build from the raw `Cookie` header(s) of the request.
    pub fn from_cookie_header(settings: Arc<CookieSettings>, header: Option<&str>) -> Self {
        let token = header.and_then(|h| settings.read(h));
        Self::new(settings, token)
    }

    /// The `Set-Cookie` value to attach to the response, if the session changed.
    pub fn set_cookie_header(&self) -> Option<String> {
        match self.update.as_ref()? {
            CookieUpdate::Set { token, ttl } => Some(self.settings.set_cookie(token, *ttl)),
            CookieUpdate::Clear => Some(self.settings.clearing_cookie()),
        }
    }

    /// Take over a token rotated on a sibling copy of this session.
    pub fn adopt(&mut self, other: &RequestSession) {
        if let Some(CookieUpdate::Set { token, ttl }) = &other.update {
            self.set_token(token.clone(), *ttl);
        }
    }

    /// Display identity decoded from the current token.
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.token.as_deref().and_then(decode_identity)
    }
}

impl SessionStore for RequestSession {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }

    fn set_token(&mut self, token: String, ttl: Duration) {
        self.token = Some(token.clone());
        self.update = Some(CookieUpdate::Set { token, ttl });
    }

    fn clear(&mut self) {
        self.token = None;
        self.update = Some(CookieUpdate::Clear);
    }
}

/// Who the session belongs to, for the user menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionIdentity {
    pub email: Option<String>,
    pub name: Option<String>,
    pub initials: String,
}

/// Decode `email` / `name` (or `username`) from the token's claims segment.
///
/// The signature is not verified; the result is for display only.
pub fn decode_identity(token: &str) -> Option<SessionIdentity> {
    let segment = token.split('.').nth(1)?;
    let bytes = decode_segment(segment)?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let claims = claims.as_object()?;

    let text = |key: &str| claims.get(key).and_then(Value::as_str).map(str::to_string);
    let email = text("email");
    let name = text("name").or_else(|| text("username"));
    let initials = initials(name.as_deref(), email.as_deref());

    Some(SessionIdentity {
        email,
        name,
        initials,
    })
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()
}

fn initials(name: Option<&str>, email: Option<&str>) -> String {
    let source = name
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .or_else(|| {
            email
                .and_then(|e| e.split('@').next())
                .map(|local| local.replace(['.', '_', '-'], " "))
        })
        .unwrap_or_default();

    let words: Vec<&str> = source.split_whitespace().collect();
    let letters: String = match words.as_slice() {
        [] => return "?".to_string(),
        [only] => only.chars().take(1).collect(),
        [first, .., last] => first.chars().take(1).chain(last.chars().take(1)).collect(),
    };

    letters.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(secure: bool) -> Arc<CookieSettings> {
        Arc::new(CookieSettings {
            name: "nortus_token".into(),
            max_age: Duration::from_secs(86_400),
            secure,
        })
    }

    fn token_with_claims(claims: &str) -> String {
        format!("header.{}.signature", URL_SAFE_NO_PAD.encode(claims))
    }

    #[test]
    fn test_read_cookie_among_others() {
        let s = settings(false);
        assert_eq!(
            s.read("locale=pt-BR; nortus_token=abc.def.ghi; theme=dark"),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(s.read("locale=pt-BR"), None);
        assert_eq!(s.read("nortus_token="), None);
        assert_eq!(s.read("nortus_token_old=x"), None);
    }

    #[test]
    fn test_missing_cookie_is_unauthenticated_not_error() {
        let session = RequestSession::from_cookie_header(settings(false), None);
        assert!(session.token().is_none());
        assert!(session.set_cookie_header().is_none());
    }

    #[test]
    fn test_set_cookie_attributes() {
        let s = settings(false);
        let cookie = s.set_cookie("tok", Duration::from_secs(86_400));
        assert!(cookie.starts_with("nortus_token=tok; Path=/; Max-Age=86400; Expires="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));

        let secure = settings(true).set_cookie("tok", Duration::from_secs(60));
        assert!(secure.ends_with("; Secure"));
    }

    #[test]
    fn test_clearing_cookie() {
        let cookie = settings(false).clearing_cookie();
        assert!(cookie.starts_with("nortus_token=; Path=/; Max-Age=0;"));
        assert!(cookie.contains("1970"));
    }

    #[test]
    fn test_session_updates_render_once() {
        let mut session =
            RequestSession::from_cookie_header(settings(false), Some("nortus_token=old"));
        assert_eq!(session.token().as_deref(), Some("old"));

        session.set_token("new".into(), Duration::from_secs(10));
        assert_eq!(session.token().as_deref(), Some("new"));
        let header = session.set_cookie_header().unwrap();
        assert!(header.starts_with("nortus_token=new;"));
        assert!(header.contains("Max-Age=10"));

        session.clear();
        assert!(session.token().is_none());
        assert!(session.set_cookie_header().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn test_adopt_takes_rotated_token_only() {
        let base = RequestSession::from_cookie_header(settings(false), Some("nortus_token=old"));
        let mut parent = base.clone();

        parent.adopt(&base);
        assert!(parent.set_cookie_header().is_none());

        let mut rotated = base.clone();
        rotated.set_token("new".into(), Duration::from_secs(5));
        parent.adopt(&rotated);
        assert_eq!(parent.token().as_deref(), Some("new"));
    }

    #[test]
    fn test_decode_identity_with_name() {
        let token = token_with_claims(r#"{"email":"leo@exemplo.com","name":"Leonardo Silva"}"#);
        let identity = decode_identity(&token).unwrap();
        assert_eq!(identity.email.as_deref(), Some("leo@exemplo.com"));
        assert_eq!(identity.name.as_deref(), Some("Leonardo Silva"));
        assert_eq!(identity.initials, "LS");
    }

    #[test]
    fn test_decode_identity_falls_back_to_username_and_email() {
        let token = token_with_claims(r#"{"username":"ana"}"#);
        let identity = decode_identity(&token).unwrap();
        assert_eq!(identity.name.as_deref(), Some("ana"));
        assert_eq!(identity.initials, "A");

        let token = token_with_claims(r#"{"email":"maria.souza@exemplo.com"}"#);
        let identity = decode_identity(&token).unwrap();
        assert!(identity.name.is_none());
        assert_eq!(identity.initials, "MS");

        let token = token_with_claims(r#"{"sub":"42"}"#);
        assert_eq!(decode_identity(&token).unwrap().initials, "?");
    }

    #[test]
    fn test_decode_identity_malformed() {
        assert!(decode_identity("opaque-token").is_none());
        assert!(decode_identity("a.!!!not-base64!!!.c").is_none());
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(decode_identity(&not_json).is_none());
        let not_object = format!("a.{}.c", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(decode_identity(&not_object).is_none());
    }

    #[test]
    fn test_decode_identity_accepts_padded_segment() {
        let padded = format!(
            "h.{}.s",
            base64::engine::general_purpose::URL_SAFE.encode(r#"{"name":"Bia"}"#)
        );
        assert_eq!(decode_identity(&padded).unwrap().initials, "B");
    }
}
