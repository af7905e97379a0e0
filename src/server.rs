//!
//! portico HTTP/WS server
//! ----------------------
//! This module defines the Axum-based HTTP API and WebSocket interface for
//! portico, the session and RBAC gateway in front of the portal sections.
//!
//! Responsibilities:
//! - Login/logout endpoints backed by the `identity` gateway and the local
//!   user table in the `security` module.
//! - Cookie + CSRF token model for browser clients, bearer tokens for
//!   programmatic ones.
//! - A catch-all navigation surface that runs every portal path through the
//!   route guard before answering.
//! - Administrative session and user management endpoints.
//! - WebSocket endpoint that re-checks authorization on every message.
//! - Background sweeper reclaiming dead session entries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::{get, post, delete}, Router, extract::{Query, State, ws::{WebSocketUpgrade, Message}, Path}, Json};
use axum::response::{IntoResponse, Response};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, error};
use anyhow::Context;

use crate::error::AppError;
use crate::identity::{
    Access, AuthGateway, LocalDirectory, LoginRequest, RoleRegistry, RouteGuard, Session,
    SessionConfig, SessionStore, to_session_info, to_session_row,
};
use crate::routes;
use crate::security;

const SESSION_COOKIE: &str = "portico_session";

/// Everything the server needs to know before it binds a socket. Field for
/// field this mirrors the PORTICO_* environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub db_root: String,
    pub session: SessionConfig,
    pub verify_timeout: Duration,
    /// Seconds between sweeper passes; zero or negative disables the sweeper.
    pub sweep_interval_secs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_root: "data".to_string(),
            session: SessionConfig::default(),
            verify_timeout: Duration::from_secs(3),
            sweep_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Build a config from PORTICO_* environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(p) = std::env::var("PORTICO_HTTP_PORT").ok().and_then(|s| s.parse::<u16>().ok()) {
            cfg.http_port = p;
        }
        if let Ok(root) = std::env::var("PORTICO_DB_FOLDER") {
            if !root.trim().is_empty() { cfg.db_root = root; }
        }
        if let Some(secs) = std::env::var("PORTICO_SESSION_TTL_SECS").ok().and_then(|s| s.parse::<u64>().ok()) {
            if secs > 0 { cfg.session.ttl = Duration::from_secs(secs); }
        }
        if let Some(b) = std::env::var("PORTICO_SLIDING_SESSIONS").ok().and_then(|s| parse_bool(&s)) {
            cfg.session.sliding = b;
        }
        if let Some(b) = std::env::var("PORTICO_SINGLE_SESSION").ok().and_then(|s| parse_bool(&s)) {
            cfg.session.single_session_per_subject = b;
        }
        if let Some(ms) = std::env::var("PORTICO_VERIFY_TIMEOUT_MS").ok().and_then(|s| s.parse::<u64>().ok()) {
            if ms > 0 { cfg.verify_timeout = Duration::from_millis(ms); }
        }
        if let Some(secs) = std::env::var("PORTICO_SWEEP_INTERVAL_SECS").ok().and_then(|s| s.parse::<i64>().ok()) {
            cfg.sweep_interval_secs = secs;
        }
        cfg
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AuthGateway>,
    pub guard: Arc<RouteGuard>,
    pub sessions: Arc<SessionStore>,
    pub db_root: String,
}

/// Wire up the store, directory, gateway and guard for the given config.
/// Ensures the database root and the default admin account exist first.
pub fn build_state(cfg: &ServerConfig) -> anyhow::Result<AppState> {
    std::fs::create_dir_all(&cfg.db_root)
        .with_context(|| format!("Failed to create or access database root: {}", cfg.db_root))?;
    security::ensure_default_admin(&cfg.db_root)
        .with_context(|| format!("While ensuring default admin under db_root: {}", cfg.db_root))?;
    let sessions = Arc::new(SessionStore::new(cfg.session.clone()));
    let directory = Arc::new(LocalDirectory::new(cfg.db_root.clone()));
    let gateway = Arc::new(AuthGateway::new(directory, sessions.clone(), cfg.verify_timeout));
    let guard = Arc::new(RouteGuard::new(sessions.clone(), Arc::new(RoleRegistry::builtin())));
    Ok(AppState { gateway, guard, sessions, db_root: cfg.db_root.clone() })
}

fn log_startup_folders(cfg: &ServerConfig) {
    let cwd = std::env::current_dir().ok();
    let exe = std::env::current_exe().ok();
    let user = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).ok();
    let db_env = std::env::var("PORTICO_DB_FOLDER").ok();
    info!(
        target: "startup",
        "portico starting. cwd={:?}, exe={:?}, user={:?}, db_root={:?}, PORTICO_DB_FOLDER_env={:?}, http_port={}",
        cwd, exe, user, cfg.db_root, db_env, cfg.http_port
    );
    info!(
        target: "startup",
        "session policy: ttl_secs={}, sliding={}, single_session_per_subject={}, verify_timeout_ms={}, sweep_interval_secs={}",
        cfg.session.ttl.as_secs(), cfg.session.sliding, cfg.session.single_session_per_subject,
        cfg.verify_timeout.as_millis(), cfg.sweep_interval_secs
    );
}

/// Start the portico HTTP server bound to the configured port.
pub async fn run_with_config(cfg: ServerConfig) -> anyhow::Result<()> {
    log_startup_folders(&cfg);
    let state = build_state(&cfg)?;

    // Background session sweeper. Sweeping only reclaims memory, validity
    // is always decided at lookup time.
    if cfg.sweep_interval_secs > 0 {
        let store_for_sweep = state.sessions.clone();
        let interval = cfg.sweep_interval_secs as u64;
        tokio::spawn(async move {
            loop {
                let removed = store_for_sweep.sweep();
                if removed > 0 { tracing::debug!(removed = removed, "session_sweep"); }
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
        });
    } else {
        tracing::info!("session_sweeper" = false, "Session sweeper disabled");
    }

    let app = app_router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Convenience entry point using defaults (port 8080, db root "data").
pub async fn run() -> anyhow::Result<()> {
    run_with_config(ServerConfig::default()).await
}

/// Entry point for the binaries: config comes from PORTICO_* env vars.
pub async fn run_from_env() -> anyhow::Result<()> {
    run_with_config(ServerConfig::from_env()).await
}

/// Mount all HTTP and WebSocket routes on the given state. Separated from
/// `run_with_config` so tests can drive the router without a socket.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "portico ok" }))
        .route("/login", get(login_form).post(login))
        .route("/logout", post(logout))
        .route("/csrf", get(get_csrf))
        .route("/session", get(get_session))
        .route("/ws", get(ws_handler))
        .route("/admin/sessions", get(admin_sessions))
        .route("/admin/revoke", post(admin_revoke))
        .route("/admin/users", get(admin_list_users).post(admin_upsert_user))
        .route("/admin/users/{username}", delete(admin_delete_user))
        .fallback(navigate)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LoginPayload { username: String, password: String }

#[derive(Debug, Deserialize)]
struct RevokePayload {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpsertUserPayload {
    username: String,
    password: String,
    role: crate::identity::Role,
    #[serde(default)]
    display_name: Option<String>,
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name { return Some(v[1..].to_string()); }
        }
    }
    None
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get("authorization").or_else(|| headers.get("Authorization"))?;
    let s = auth.to_str().ok()?;
    let rest = s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer "))?;
    let t = rest.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

/// How the request carried its token. Bearer wins when both are present.
/// The carrier decides the deny shape (redirect vs JSON) and whether CSRF
/// applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Carrier { Bearer, Cookie, None }

fn session_token(headers: &HeaderMap) -> (Option<String>, Carrier) {
    if let Some(t) = bearer_token(headers) { return (Some(t), Carrier::Bearer); }
    match parse_cookie(headers, SESSION_COOKIE) {
        Some(t) => (Some(t), Carrier::Cookie),
        None => (None, Carrier::None),
    }
}

fn set_session_cookie(token: &str) -> HeaderValue {
    // Secure, HttpOnly cookie scoped to path / with SameSite=Strict
    HeaderValue::from_str(&format!("{}={}; HttpOnly; Secure; SameSite=Strict; Path=/", SESSION_COOKIE, token)).unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!("{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/", SESSION_COOKIE)).unwrap()
}

/// Resolve the presented token to a live session, or None. Dead and unknown
/// tokens land in the same None so handlers cannot leak the difference.
fn live_session(state: &AppState, token: &str) -> Option<Session> {
    let s = state.sessions.lookup(token)?;
    if s.is_valid(state.sessions.now_ms()) { Some(s) } else { None }
}

/// CSRF applies to cookie-carried state changes only. Bearer requests put
/// the token in a header themselves, which a cross-site form cannot do.
fn csrf_ok(session: &Session, headers: &HeaderMap, carrier: Carrier) -> bool {
    if carrier != Carrier::Cookie { return true; }
    match headers.get("x-csrf-token").and_then(|v| v.to_str().ok()) {
        Some(provided) => provided == session.csrf,
        None => false,
    }
}

/// The uniform challenge for requests that are not (or no longer) signed in.
/// Browser GETs are redirected to the login form with the original path in
/// `next`; everything else gets a 401 JSON body. A presented cookie is
/// cleared either way. Unauthenticated and invalid-session cases flow
/// through here identically, the carrier shape alone decides the response.
fn challenge_response(method: &Method, path: &str, carrier: Carrier) -> Response {
    let mut headers = HeaderMap::new();
    if carrier == Carrier::Cookie {
        headers.insert("Set-Cookie", clear_session_cookie());
    }
    if method == Method::GET && carrier != Carrier::Bearer {
        headers.insert(
            "Location",
            HeaderValue::from_str(&routes::login_redirect_target(path))
                .unwrap_or_else(|_| HeaderValue::from_static(routes::LOGIN_PATH)),
        );
        return (StatusCode::SEE_OTHER, headers).into_response();
    }
    (
        StatusCode::UNAUTHORIZED,
        headers,
        Json(json!({"status":"unauthenticated","login": routes::LOGIN_PATH})),
    )
        .into_response()
}

fn forbidden_response() -> Response {
    // 403 body deliberately names no granted sections
    (StatusCode::FORBIDDEN, Json(json!({"status":"forbidden"}))).into_response()
}

fn app_error_response(e: AppError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"status":"error","code": e.code_str(),"message": e.message()}))).into_response()
}

/// The login surface itself is public. Browser deployments put a form in
/// front of this; the API echoes `next` so a client can resume where the
/// challenge interrupted it.
async fn login_form(Query(params): Query<std::collections::HashMap<String, String>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({"status":"ok","path": routes::LOGIN_PATH,"public": true,"next": params.get("next")})),
    )
        .into_response()
}

async fn login(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<LoginPayload>) -> Response {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string());
    let req = LoginRequest { username: payload.username, password: payload.password, ip };
    match state.gateway.login(req).await {
        Ok(resp) => {
            let mut h = HeaderMap::new();
            h.insert("Set-Cookie", set_session_cookie(&resp.session.token));
            (
                StatusCode::OK,
                h,
                Json(json!({
                    "status": "ok",
                    "token": resp.session.token,
                    "csrf": resp.session.csrf,
                    "session": to_session_info(&resp.session),
                })),
            )
                .into_response()
        }
        Err(e) => {
            if matches!(e, AppError::Internal { .. } | AppError::Upstream { .. } | AppError::UpstreamTimeout { .. }) {
                error!("login error: {e}");
            }
            app_error_response(e)
        }
    }
}

/// Logout always answers 200 with a cleared cookie. Revoking an unknown or
/// already dead token is a no-op, so the response discloses nothing.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (token, _carrier) = session_token(&headers);
    if let Some(t) = token {
        let _ = state.gateway.logout(&t).await;
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::OK, h, Json(json!({"status":"ok"}))).into_response()
}

async fn get_csrf(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Response {
    let (token, carrier) = session_token(&headers);
    let Some(session) = token.as_deref().and_then(|t| live_session(&state, t)) else {
        return challenge_response(&method, "/csrf", carrier);
    };
    (StatusCode::OK, Json(json!({"status":"ok","csrf": session.csrf}))).into_response()
}

/// Who am I: echoes the live session back to its owner.
async fn get_session(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Response {
    let (token, carrier) = session_token(&headers);
    let Some(session) = token.as_deref().and_then(|t| live_session(&state, t)) else {
        return challenge_response(&method, "/session", carrier);
    };
    (StatusCode::OK, Json(json!({"status":"ok","session": to_session_info(&session)}))).into_response()
}

/// Gate an /admin request: session must be live and its role granted the
/// /admin section. Returns the session for the CSRF check on mutations.
fn require_admin(state: &AppState, method: &Method, headers: &HeaderMap) -> Result<(Session, Carrier), Response> {
    let (token, carrier) = session_token(headers);
    match state.guard.check(token.as_deref(), "/admin") {
        Access::Authorized { .. } => {
            // check() vouched for the token, lookup cannot miss here
            let session = token
                .as_deref()
                .and_then(|t| state.sessions.lookup(t))
                .ok_or_else(|| challenge_response(method, "/admin", carrier))?;
            Ok((session, carrier))
        }
        Access::Forbidden { .. } => Err(forbidden_response()),
        Access::Unauthenticated | Access::Invalid => Err(challenge_response(method, "/admin", carrier)),
    }
}

async fn admin_sessions(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Response {
    let (_session, _carrier) = match require_admin(&state, &method, &headers) {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    let now = state.sessions.now_ms();
    let rows: Vec<_> = state.sessions.snapshot().iter().map(|s| to_session_row(s, now)).collect();
    (
        StatusCode::OK,
        Json(json!({"status":"ok","active": state.sessions.active_count(),"sessions": rows})),
    )
        .into_response()
}

/// Revoke every session of a subject, or one session by exact token.
async fn admin_revoke(State(state): State<AppState>, method: Method, headers: HeaderMap, Json(payload): Json<RevokePayload>) -> Response {
    let (session, carrier) = match require_admin(&state, &method, &headers) {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    if !csrf_ok(&session, &headers, carrier) {
        return (StatusCode::FORBIDDEN, Json(json!({"status":"forbidden","error":"invalid csrf"}))).into_response();
    }
    let revoked = match (&payload.subject, &payload.token) {
        (Some(subject), _) => state.sessions.revoke_subject(subject),
        (None, Some(token)) => if state.sessions.revoke(token) { 1 } else { 0 },
        (None, None) => {
            return app_error_response(AppError::user("missing_target", "provide a subject or a token to revoke"));
        }
    };
    info!(revoked = revoked, admin = %session.principal.username, "admin revoke");
    (StatusCode::OK, Json(json!({"status":"ok","revoked": revoked}))).into_response()
}

async fn admin_list_users(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Response {
    let (_session, _carrier) = match require_admin(&state, &method, &headers) {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    match security::list_users(&state.db_root) {
        Ok(users) => (StatusCode::OK, Json(json!({"status":"ok","users": users}))).into_response(),
        Err(e) => {
            error!("list users failed: {e}");
            app_error_response(AppError::internal("user_table", e.to_string()))
        }
    }
}

async fn admin_upsert_user(State(state): State<AppState>, method: Method, headers: HeaderMap, Json(payload): Json<UpsertUserPayload>) -> Response {
    let (session, carrier) = match require_admin(&state, &method, &headers) {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    if !csrf_ok(&session, &headers, carrier) {
        return (StatusCode::FORBIDDEN, Json(json!({"status":"forbidden","error":"invalid csrf"}))).into_response();
    }
    if payload.password.is_empty() {
        return app_error_response(AppError::user("empty_password", "password must not be empty"));
    }
    let display = payload.display_name.clone().unwrap_or_else(|| payload.username.clone());
    match security::upsert_user(&state.db_root, &payload.username, &display, &payload.password, payload.role) {
        Ok(()) => {
            info!(username = %payload.username, role = %payload.role, admin = %session.principal.username, "user upserted");
            (StatusCode::OK, Json(json!({"status":"ok"}))).into_response()
        }
        Err(e) => app_error_response(AppError::user("user_upsert", e.to_string())),
    }
}

async fn admin_delete_user(State(state): State<AppState>, method: Method, headers: HeaderMap, Path(username): Path<String>) -> Response {
    let (session, carrier) = match require_admin(&state, &method, &headers) {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    if !csrf_ok(&session, &headers, carrier) {
        return (StatusCode::FORBIDDEN, Json(json!({"status":"forbidden","error":"invalid csrf"}))).into_response();
    }
    match security::delete_user(&state.db_root, &username) {
        Ok(()) => {
            // Deleting the account does not kill live sessions; admins use
            // /admin/revoke for that.
            info!(username = %username, admin = %session.principal.username, "user deleted");
            (StatusCode::OK, Json(json!({"status":"ok"}))).into_response()
        }
        Err(e) => {
            error!("delete user failed: {e}");
            app_error_response(AppError::internal("user_table", e.to_string()))
        }
    }
}

/// Catch-all for portal navigation. Public paths answer without a session,
/// unknown paths are 404 for everyone, known sections go through the guard.
async fn navigate(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let path = routes::normalize_path(uri.path());
    if routes::is_public(&path) {
        return (StatusCode::OK, Json(json!({"status":"ok","path": path,"public": true}))).into_response();
    }
    let Some(section) = routes::section_of(&path) else {
        // Not part of the portal at all. Same 404 for everyone, signed in
        // or not.
        return (StatusCode::NOT_FOUND, Json(json!({"status":"not_found"}))).into_response();
    };
    let (token, carrier) = session_token(&headers);
    match state.guard.check(token.as_deref(), &path) {
        Access::Authorized { ctx } => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "path": path,
                "section": section,
                "user": ctx.principal.username,
                "role": ctx.principal.role.to_string(),
                "request_id": ctx.request_id,
            })),
        )
            .into_response(),
        Access::Forbidden { .. } => forbidden_response(),
        Access::Unauthenticated | Access::Invalid => challenge_response(&method, &path, carrier),
    }
}

#[derive(Debug, Deserialize)]
struct WsProbe { path: String }

/// WebSocket surface for live navigation checks. The upgrade requires a live
/// session; afterwards every probe message runs through the guard again, so
/// a revocation mid-connection is visible on the next probe.
async fn ws_handler(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let (token, _carrier) = session_token(&headers);
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    };
    if live_session(&state, &token).is_none() {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    ws.on_upgrade(move |mut socket| {
        let state = state.clone();
        async move {
            use futures_util::StreamExt;
            while let Some(Ok(msg)) = socket.next().await {
                match msg {
                    Message::Text(text) => {
                        let probe: WsProbe = match serde_json::from_str(&text) {
                            Ok(p) => p,
                            Err(_) => {
                                let _ = socket.send(Message::Text(json!({"status":"error","code":"user_input","message":"expected {\"path\": \"/section\"}"}).to_string().into())).await;
                                continue;
                            }
                        };
                        match state.guard.check(Some(&token), &probe.path) {
                            Access::Authorized { ctx } => {
                                let _ = socket.send(Message::Text(json!({"status":"ok","path": ctx.path,"role": ctx.principal.role.to_string()}).to_string().into())).await;
                            }
                            Access::Forbidden { .. } => {
                                let _ = socket.send(Message::Text(json!({"status":"forbidden","path": probe.path}).to_string().into())).await;
                            }
                            Access::Unauthenticated | Access::Invalid => {
                                // Session died mid-connection; tell the client
                                // once and drop the socket.
                                let _ = socket.send(Message::Text(json!({"status":"unauthenticated","login": routes::LOGIN_PATH}).to_string().into())).await;
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    })
}
