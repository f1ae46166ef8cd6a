//! DevCollab HTTP surface
//!
//! Axum server exposing the dashboard routes. Each endpoint has a thin axum
//! handler that applies the session guard and delegates to a pure inner
//! function returning `(StatusCode, json)`, so the inner functions can be
//! tested without axum dispatch.
//!
//! Endpoints:
//! - GET  /                              landing (redirects when signed in)
//! - GET  /auth/signin                   redirect to the GitHub sign-in flow
//! - GET  /dashboard                     repositories of the signed-in user
//! - GET  /dashboard/project/:repo_id    directory listing or file
//! - PUT  /dashboard/project/:repo_id    commit a file edit
//! - GET  /dashboard/chat/:repo_id       chat room WebSocket
//! - GET  /dashboard/settings            identity and configuration
//! - GET  /health                        liveness

use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use devcollab_core::models::FileUpdate;
use devcollab_core::{
    encode_content, AuthError, DevcollabConfig, GithubClient, GithubError, GoTrueSessionProvider, Navigation,
    RealtimeClient, Route, SessionProvider, SignInOptions, Url,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::chat_socket;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub config: DevcollabConfig,
    pub github: GithubClient,
    pub realtime: Arc<dyn RealtimeClient>,
    pub auth: Arc<GoTrueSessionProvider>,
    /// Cancelled on shutdown; open chat sockets watch it.
    pub shutdown: CancellationToken,
}

impl HttpState {
    pub fn from_config(config: DevcollabConfig) -> devcollab_core::error::Result<Self> {
        let github = GithubClient::new(config.github.clone())?;
        let realtime = devcollab_core::create_realtime(&config, None);
        let auth = Arc::new(GoTrueSessionProvider::new(config.backend.clone())?);
        Ok(Self {
            config,
            github,
            realtime,
            auth,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(landing_handler))
        .route("/health", get(health_handler))
        .route("/auth/signin", get(signin_handler))
        .route("/dashboard", get(dashboard_handler))
        .route(
            "/dashboard/project/:repo_id",
            get(project_handler).put(save_handler),
        )
        .route("/dashboard/chat/:repo_id", get(chat_handler))
        .route("/dashboard/settings", get(settings_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let cancel = state.shutdown.clone();
    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("DevCollab HTTP listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            cancel.cancel();
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ProjectQuery {
    pub path: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub message: String,
    /// Plain text; encoded for transport by the server.
    pub content: String,
    /// Blob sha from the read this edit is based on.
    pub sha: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatQuery {
    /// Browsers cannot set headers on a WebSocket handshake.
    pub token: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

fn error_body(status: StatusCode, msg: impl Into<String>) -> (StatusCode, serde_json::Value) {
    (
        status,
        serde_json::to_value(ErrorResponse::new(msg)).unwrap_or_default(),
    )
}

fn github_failure(e: &GithubError) -> (StatusCode, serde_json::Value) {
    let status = match e {
        GithubError::Api { status: 401, .. } => StatusCode::UNAUTHORIZED,
        GithubError::Api { status: 403, .. } => StatusCode::FORBIDDEN,
        GithubError::Api { status: 404, .. } => StatusCode::NOT_FOUND,
        GithubError::Conflict { .. } => StatusCode::CONFLICT,
        GithubError::NotAFile { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    error_body(status, e.to_string())
}

// ============================================================================
// Session guard
// ============================================================================

/// Provider token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Apply the route guard; `Err` carries the redirect to answer with.
fn guard(route: Route, token: Option<&str>) -> Result<(), Response> {
    match route.guard(token.is_some()) {
        Navigation::Render(_) => Ok(()),
        Navigation::Redirect(to) => Err(Redirect::to(&to.path()).into_response()),
    }
}

macro_rules! signed_in {
    ($route:expr, $headers:expr) => {{
        let token = bearer_token(&$headers);
        if let Err(redirect) = guard($route, token.as_deref()) {
            return redirect;
        }
        token.unwrap_or_default()
    }};
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn landing_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let sign_in_url = sign_in_url(state).map(|u| u.to_string()).ok();
    (
        StatusCode::OK,
        serde_json::json!({
            "app": "DevCollab",
            "version": env!("CARGO_PKG_VERSION"),
            "sign_in_url": sign_in_url,
        }),
    )
}

fn sign_in_url(state: &HttpState) -> Result<Url, AuthError> {
    state.auth.sign_in_url(
        "github",
        &SignInOptions {
            redirect_url: state.config.http.redirect_url.clone(),
            scopes: state.config.http.scopes.clone(),
        },
    )
}

pub async fn repos_inner(github: &GithubClient, token: &str) -> (StatusCode, serde_json::Value) {
    match github.list_all_repos(token).await {
        Ok(repos) => (
            StatusCode::OK,
            serde_json::json!({
                "count": repos.len(),
                "repositories": repos,
            }),
        ),
        Err(e) => github_failure(&e),
    }
}

/// Owner defaults to the signed-in login.
async fn resolve_owner(
    github: &GithubClient,
    token: &str,
    owner: Option<String>,
) -> Result<String, GithubError> {
    match owner.filter(|o| !o.is_empty()) {
        Some(o) => Ok(o),
        None => Ok(github.current_user(token).await?.login),
    }
}

pub async fn project_inner(
    github: &GithubClient,
    token: &str,
    repo: &str,
    query: ProjectQuery,
) -> (StatusCode, serde_json::Value) {
    let owner = match resolve_owner(github, token, query.owner).await {
        Ok(o) => o,
        Err(e) => return github_failure(&e),
    };
    let path = query.path.unwrap_or_default();

    match github.get_contents(token, &owner, repo, &path).await {
        Ok(contents) => (
            StatusCode::OK,
            serde_json::json!({
                "owner": owner,
                "repo": repo,
                "path": path,
                "contents": contents,
            }),
        ),
        Err(e) => github_failure(&e),
    }
}

pub async fn save_inner(
    github: &GithubClient,
    token: &str,
    repo: &str,
    query: ProjectQuery,
    request: SaveRequest,
) -> (StatusCode, serde_json::Value) {
    let path = query.path.unwrap_or_default();
    if path.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Missing 'path'");
    }
    if request.message.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Missing commit 'message'");
    }
    if request.sha.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Missing 'sha' of the file being edited");
    }

    let owner = match resolve_owner(github, token, query.owner).await {
        Ok(o) => o,
        Err(e) => return github_failure(&e),
    };

    let update = FileUpdate {
        message: request.message,
        content: encode_content(&request.content),
        sha: Some(request.sha),
    };
    match github.put_contents(token, &owner, repo, &path, &update).await {
        Ok(result) => (
            StatusCode::OK,
            serde_json::json!({
                "saved": true,
                "path": path,
                "sha": result.content_sha,
                "commit": result.commit_sha,
            }),
        ),
        Err(e) => github_failure(&e),
    }
}

pub async fn settings_inner(state: &HttpState, token: &str) -> (StatusCode, serde_json::Value) {
    let mut enricher = devcollab_core::IdentityEnricher::new(state.github.clone());
    let identity = enricher.enrich(token).await.cloned();
    (
        StatusCode::OK,
        serde_json::json!({
            "identity": identity,
            "backend_url": state.config.backend.url,
            "github_api": state.config.github.api_base,
            "realtime_mode": format!("{:?}", state.config.realtime.mode).to_lowercase(),
        }),
    )
}

// ============================================================================
// Axum handlers (thin wrappers)
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn landing_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let token = bearer_token(&headers);
    if let Err(redirect) = guard(Route::Landing, token.as_deref()) {
        return redirect;
    }
    let (status, body) = landing_inner(&state);
    (status, Json(body)).into_response()
}

async fn signin_handler(State(state): State<Arc<HttpState>>) -> Response {
    match sign_in_url(&state) {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build sign-in URL");
            let (status, body) = error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            (status, Json(body)).into_response()
        }
    }
}

async fn dashboard_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let token = signed_in!(Route::Dashboard, headers);
    let (status, body) = repos_inner(&state.github, &token).await;
    (status, Json(body)).into_response()
}

async fn project_handler(
    State(state): State<Arc<HttpState>>,
    Path(repo_id): Path<String>,
    Query(query): Query<ProjectQuery>,
    headers: HeaderMap,
) -> Response {
    let token = signed_in!(
        Route::Project {
            repo_id: repo_id.clone()
        },
        headers
    );
    let (status, body) = project_inner(&state.github, &token, &repo_id, query).await;
    (status, Json(body)).into_response()
}

async fn save_handler(
    State(state): State<Arc<HttpState>>,
    Path(repo_id): Path<String>,
    Query(query): Query<ProjectQuery>,
    headers: HeaderMap,
    Json(request): Json<SaveRequest>,
) -> Response {
    let token = signed_in!(
        Route::Project {
            repo_id: repo_id.clone()
        },
        headers
    );
    let (status, body) = save_inner(&state.github, &token, &repo_id, query, request).await;
    (status, Json(body)).into_response()
}

async fn settings_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let token = signed_in!(Route::Settings, headers);
    let (status, body) = settings_inner(&state, &token).await;
    (status, Json(body)).into_response()
}

async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Path(repo_id): Path<String>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let token = bearer_token(&headers).or(query.token.filter(|t| !t.is_empty()));
    if let Err(redirect) = guard(
        Route::Chat {
            repo_id: repo_id.clone(),
        },
        token.as_deref(),
    ) {
        return redirect;
    }
    let token = token.unwrap_or_default();

    let Some(upgrade) = upgrade else {
        let (status, body) = error_body(StatusCode::UPGRADE_REQUIRED, "Chat requires a WebSocket");
        return (status, Json(body)).into_response();
    };

    upgrade.on_upgrade(move |socket| chat_socket::run_chat_socket(socket, state, repo_id, token))
}
