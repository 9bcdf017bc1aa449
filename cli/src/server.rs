use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, Request, StatusCode,
    },
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use nortus_core::config::UpstreamPaths;
use nortus_core::normalize::{normalize_dashboard, normalize_map, normalize_single_ticket};
use nortus_core::refresh::extract_access_token;
use nortus_core::upstream::Method;
use nortus_core::{
    paginate, Config, CookieSettings, CreateTicket, HttpUpstream, ListQuery, ProxyError,
    RefreshRetry, RequestSession, SessionStore, TicketStats, UpdateTicket, Upstream,
    UpstreamRequest, UpstreamResponse,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::error::{message_body, status_code, AppError};

const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=utf-8";

type Params = Vec<(String, String)>;

#[derive(Clone)]
pub struct AppState {
    engine: RefreshRetry,
    cookies: Arc<CookieSettings>,
    config: Arc<Config>,
}

impl AppState {
    pub fn new(config: &Config, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            engine: RefreshRetry::new(
                upstream,
                config.upstream.paths.refresh.clone(),
                config.session.ttl(),
            ),
            cookies: Arc::new(CookieSettings::from_config(config)),
            config: Arc::new(config.clone()),
        }
    }

    /// Session for one request, read from every `Cookie` header it carries.
    fn session(&self, headers: &HeaderMap) -> RequestSession {
        let cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join("; ");

        RequestSession::from_cookie_header(
            Arc::clone(&self.cookies),
            (!cookie.is_empty()).then_some(cookie.as_str()),
        )
    }

    fn paths(&self) -> &UpstreamPaths {
        &self.config.upstream.paths
    }
}

#[derive(Debug, Deserialize)]
struct Credentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub async fn start_server(config: Config) -> Result<()> {
    let log_level = if config.server.verbose {
        tracing::Level::DEBUG
    } else {
        match config.logging.level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    };

    tracing_subscriber::fmt()
        .with_target(config.logging.include_modules)
        .with_max_level(log_level)
        .compact()
        .init();

    let upstream = HttpUpstream::new(&config.upstream).context("failed to build upstream client")?;
    let app = build_router(&config, Arc::new(upstream));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    println!(
        "\n🧭 Nortus console proxy started\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n   🌐 Server:      http://{}\n   🔗 Upstream:    {}\n   🍪 Cookie:      {} ({:?})\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n",
        addr, config.upstream.base_url, config.session.cookie_name, config.server.environment
    );

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(config: &Config, upstream: Arc<dyn Upstream>) -> Router {
    let state = AppState::new(config, upstream);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/session", get(session_handler))
        .route("/tickets", get(list_tickets_handler).post(create_ticket_handler))
        .route("/tickets/stats", get(ticket_stats_handler))
        .route(
            "/tickets/:id",
            get(get_ticket_handler)
                .patch(update_ticket_handler)
                .delete(delete_ticket_handler),
        )
        .route("/dashboard", get(dashboard_handler))
        .route("/map/locations", get(map_handler))
        .route("/chat", get(chat_handler))
        .route("/simulator-plans", get(simulator_plans_handler))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                info_span!(
                    "request",
                    id = %Uuid::new_v4(),
                    method = %request.method(),
                    path = %request.uri().path()
                )
            }),
        );

    let router = if config.server.cors_enabled {
        router.layer(build_cors(config))
    } else {
        router
    };

    router.with_state(state)
}

fn build_cors(config: &Config) -> CorsLayer {
    use axum::http::Method as HttpMethod;

    let methods = [
        HttpMethod::GET,
        HttpMethod::POST,
        HttpMethod::PATCH,
        HttpMethod::DELETE,
        HttpMethod::OPTIONS,
    ];

    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        // Cookies only travel cross-origin with credentials and explicit origins.
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE, ACCEPT])
            .allow_credentials(true)
    }
}

/// Attach the session's pending cookie, if any, to whatever the handler produced.
fn finish(session: &RequestSession, result: Result<Response, AppError>) -> Response {
    let mut response = match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };

    if let Some(cookie) = session.set_cookie_header() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(_) => warn!("session cookie is not a valid header value"),
        }
    }
    response
}

/// Relay an upstream reply untouched.
fn forward(response: UpstreamResponse) -> Response {
    let content_type = response
        .content_type
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let mut forwarded = (status_code(response.status), response.body).into_response();
    let value = HeaderValue::from_str(&content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    forwarded.headers_mut().insert(CONTENT_TYPE, value);
    forwarded
}

/// JSON of a 2xx reply; a body that does not parse is a malformed response.
fn success_json(response: &UpstreamResponse) -> Result<Value, AppError> {
    response
        .json()
        .ok_or_else(|| ProxyError::MalformedResponse(response.body.clone()).into())
}

fn parse_body<T: DeserializeOwned>(body: &Bytes, what: &str) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid {what}: {e}")).into())
}

fn ticket_path(paths: &UpstreamPaths, id: &str) -> String {
    format!("{}/{}", paths.tickets, urlencoding::encode(id))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ─── Auth ───────────────────────────────────────────────────────────────────

async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut session = state.session(&headers);
    let result = sign_in(&state, &mut session, &body).await;
    finish(&session, result)
}

async fn sign_in(
    state: &AppState,
    session: &mut RequestSession,
    body: &Bytes,
) -> Result<Response, AppError> {
    let credentials: Credentials = parse_body(body, "login payload")?;
    let email = credentials.email.trim();
    if email.is_empty() || credentials.password.is_empty() {
        return Err(ProxyError::InvalidRequest("email and password are required".into()).into());
    }

    let request = UpstreamRequest::new(Method::POST, state.paths().login.clone())
        .with_json(&json!({ "email": email, "password": credentials.password }));
    let response = state.engine.upstream().call(&request, None).await?;

    if !response.is_success() {
        warn!(status = response.status, "login rejected upstream");
        let body = match response.json() {
            Some(value) if !value.is_null() => value,
            _ => message_body("Unauthorized"),
        };
        return Err(AppError::Upstream {
            status: response.status,
            body,
        });
    }

    let payload = success_json(&response)?;
    let token = extract_access_token(&payload).ok_or_else(|| {
        ProxyError::MalformedResponse("login response carried no access token".into())
    })?;

    session.set_token(token, state.engine.session_ttl());
    info!("user signed in");

    Ok(Json(json!({ "user": { "name": email, "email": email } })).into_response())
}

async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut session = state.session(&headers);
    session.clear();
    info!("user signed out");
    finish(&session, Ok(Json(json!({ "ok": true })).into_response()))
}

async fn refresh_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut session = state.session(&headers);
    let result = rotate_token(&state, &mut session).await;
    finish(&session, result)
}

async fn rotate_token(state: &AppState, session: &mut RequestSession) -> Result<Response, AppError> {
    let token = session.token().ok_or(ProxyError::Unauthenticated)?;
    let next = state.engine.refresh(&token).await?;
    session.set_token(next, state.engine.session_ttl());
    info!("session token refreshed on request");
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn session_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = state.session(&headers);
    let result = match (session.token(), session.identity()) {
        (None, _) => Err(ProxyError::Unauthenticated.into()),
        (Some(_), None) => Err(ProxyError::Unauthorized.into()),
        (Some(_), Some(user)) => Ok(Json(json!({ "user": user })).into_response()),
    };
    finish(&session, result)
}

// ─── Tickets ────────────────────────────────────────────────────────────────

async fn list_tickets_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Response {
    let mut session = state.session(&headers);
    let result = list_tickets(&state, &mut session, params).await;
    finish(&session, result)
}

async fn list_tickets(
    state: &AppState,
    session: &mut RequestSession,
    params: Params,
) -> Result<Response, AppError> {
    let query = ListQuery::from_params(&params, state.config.tickets.default_page_size);
    let request = UpstreamRequest::get(state.paths().tickets.clone()).with_query(params);

    let response = state.engine.execute(session, &request).await?;
    if !response.is_success() {
        return Err(AppError::upstream(response));
    }

    let payload = success_json(&response)?;
    Ok(Json(paginate(&payload, &query)).into_response())
}

async fn create_ticket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut session = state.session(&headers);
    let result = create_ticket(&state, &mut session, &body).await;
    finish(&session, result)
}

async fn create_ticket(
    state: &AppState,
    session: &mut RequestSession,
    body: &Bytes,
) -> Result<Response, AppError> {
    let ticket: CreateTicket = parse_body(body, "ticket")?;
    let payload = serde_json::to_value(&ticket)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid ticket: {e}")))?;
    let request =
        UpstreamRequest::new(Method::POST, state.paths().tickets.clone()).with_json(&payload);

    let response = state.engine.execute(session, &request).await?;
    if !response.is_success() {
        return Err(AppError::upstream(response));
    }

    let created = success_json(&response)?;
    Ok(match normalize_single_ticket(&created) {
        Some(ticket) => Json(ticket).into_response(),
        None => Json(created).into_response(),
    })
}

async fn ticket_stats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Response {
    let mut session = state.session(&headers);
    let result = TicketStats::new(&state.engine, &state.paths().tickets)
        .collect(&mut session, &params)
        .await
        .map(|snapshot| Json(snapshot).into_response())
        .map_err(AppError::from);
    finish(&session, result)
}

async fn get_ticket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut session = state.session(&headers);
    let request = UpstreamRequest::get(ticket_path(state.paths(), &id));
    let result = pass_through(&state, &mut session, &request).await;
    finish(&session, result)
}

async fn update_ticket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let mut session = state.session(&headers);
    let result = update_ticket(&state, &mut session, &id, &body).await;
    finish(&session, result)
}

async fn update_ticket(
    state: &AppState,
    session: &mut RequestSession,
    id: &str,
    body: &Bytes,
) -> Result<Response, AppError> {
    let update: UpdateTicket = parse_body(body, "ticket update")?;
    let payload = serde_json::to_value(&update)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid ticket update: {e}")))?;
    let mut request =
        UpstreamRequest::new(Method::PATCH, ticket_path(state.paths(), id)).with_json(&payload);

    let response = state.engine.execute(session, &request).await?;
    if response.status != StatusCode::METHOD_NOT_ALLOWED.as_u16() {
        return Ok(forward(response));
    }

    // The refresh budget is spent on the PATCH; the PUT goes out once with
    // whatever token the session holds now.
    info!(id, "upstream refused PATCH, retrying as PUT");
    request.method = Method::PUT;
    let token = session.token();
    let response = state
        .engine
        .upstream()
        .call(&request, token.as_deref())
        .await?;
    Ok(forward(response))
}

async fn delete_ticket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut session = state.session(&headers);
    let request = UpstreamRequest::new(Method::DELETE, ticket_path(state.paths(), &id));
    let result = pass_through(&state, &mut session, &request).await;
    finish(&session, result)
}

async fn pass_through(
    state: &AppState,
    session: &mut RequestSession,
    request: &UpstreamRequest,
) -> Result<Response, AppError> {
    let response = state.engine.execute(session, request).await?;
    Ok(forward(response))
}

// ─── Console views ──────────────────────────────────────────────────────────

async fn dashboard_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut session = state.session(&headers);
    let request = UpstreamRequest::get(state.paths().dashboard.clone());
    let result = fetch_view(&state, &mut session, &request, |payload| {
        Json(normalize_dashboard(payload)).into_response()
    })
    .await;
    finish(&session, result)
}

async fn map_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut session = state.session(&headers);
    let request = UpstreamRequest::get(state.paths().map.clone());
    let result = fetch_view(&state, &mut session, &request, |payload| {
        Json(normalize_map(payload)).into_response()
    })
    .await;
    finish(&session, result)
}

async fn fetch_view(
    state: &AppState,
    session: &mut RequestSession,
    request: &UpstreamRequest,
    render: impl FnOnce(&Value) -> Response,
) -> Result<Response, AppError> {
    let response = state.engine.execute(session, request).await?;
    if !response.is_success() {
        return Err(AppError::upstream(response));
    }
    let payload = success_json(&response)?;
    Ok(render(&payload))
}

async fn chat_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut session = state.session(&headers);
    let request = UpstreamRequest::get(state.paths().chat.clone());
    let result = state
        .engine
        .execute(&mut session, &request)
        .await
        .map(|response| {
            let body = response
                .json()
                .filter(|value| !value.is_null())
                .unwrap_or_else(|| json!({}));
            (status_code(response.status), Json(body)).into_response()
        })
        .map_err(AppError::from);
    finish(&session, result)
}

async fn simulator_plans_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut session = state.session(&headers);
    let request = UpstreamRequest::get(state.paths().simulator_plans.clone());
    let result = pass_through(&state, &mut session, &request).await;
    finish(&session, result)
}
