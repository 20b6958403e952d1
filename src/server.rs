//! HTTP surface for the sync pipeline.
//!
//! Exposes the current sidebar, manual and external triggers, the webhook
//! receiver, content saving, and a WebSocket feed of index updates. All
//! handlers talk to one shared [`SyncCoordinator`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/health` | Health check (returns version) |
//! | `GET`  | `/api/sidebar` | Current sidebar document (`text/markdown`) |
//! | `POST` | `/api/update-sidebar` | Run a fresh sync pass and return the result |
//! | `GET`  | `/api/content` | Discovered content grouped by category |
//! | `POST` | `/api/notify-change` | Clear the cache and queue a fresh pass |
//! | `POST` | `/api/webhook` | GitHub webhook receiver |
//! | `GET`  | `/api/status` | Coordinator phase and counters |
//! | `POST` | `/api/save-content` | Write a content file to the remote repository |
//! | `POST` | `/api/create-pr` | Open a content-update branch and pull request |
//! | `GET`  | `/ws` | WebSocket feed of `index-updated` events |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "collection is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `rate_limited` (429), `sync_failed` (500), `remote_unreachable` (502).
//!
//! # WebSocket
//!
//! On connect the observer receives `{"type":"connected",...}`, then every
//! `{"type":"index-updated","content":...}` event. Sending the text frame
//! `visibility-regained` queues a cached check pass.

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::config::{CategoryConfig, Config};
use crate::coordinator::{Poller, SyncCoordinator, SyncStatus, TriggerSource};
use crate::error::{RemoteError, SyncError};
use crate::frontmatter::compose;
use crate::models::ContentDescriptor;
use crate::remote::{GitHubStore, RemoteStore};
use crate::webhook::{WebhookClassifier, WebhookPayload};

/// Text frame an observer sends when it becomes visible again.
pub const VISIBILITY_FRAME: &str = "visibility-regained";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    coordinator: SyncCoordinator,
    store: Arc<dyn RemoteStore>,
    classifier: Arc<WebhookClassifier>,
    categories: Arc<Vec<CategoryConfig>>,
}

/// Starts the HTTP server against the GitHub repository named in `[remote]`.
///
/// Runs until interrupted with Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = GitHubStore::new(&config.remote)?;
    run_server_with_store(config, Arc::new(store)).await
}

/// Starts the HTTP server against an arbitrary [`RemoteStore`].
///
/// Spawns the sync coordinator (persisting to `[sidebar].output`) and, unless
/// `[sync].poll_interval_secs` is zero, the periodic poller.
pub async fn run_server_with_store(
    config: &Config,
    store: Arc<dyn RemoteStore>,
) -> anyhow::Result<()> {
    let coordinator = SyncCoordinator::from_config(config, store.clone(), true)?;
    let poller = match config.sync.poll_interval() {
        Some(interval) => Some(Poller::spawn(coordinator.clone(), interval)),
        None => {
            coordinator.schedule(TriggerSource::Scheduled);
            None
        }
    };

    let state = AppState {
        coordinator,
        store,
        classifier: Arc::new(WebhookClassifier::new(
            &config.server.webhook_ref,
            &config.content.include_globs,
        )?),
        categories: Arc::new(config.content.categories.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/sidebar", get(handle_sidebar))
        .route("/api/update-sidebar", post(handle_update_sidebar))
        .route("/api/content", get(handle_content))
        .route("/api/notify-change", post(handle_notify_change))
        .route("/api/webhook", post(handle_webhook))
        .route("/api/status", get(handle_status))
        .route("/api/save-content", post(handle_save_content))
        .route("/api/create-pr", post(handle_create_pr))
        .route("/ws", get(handle_ws))
        .layer(cors)
        .with_state(state);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "sidebar-sync listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(poller) = poller {
        poller.stop().await;
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        app_error(StatusCode::INTERNAL_SERVER_ERROR, "sync_failed", err.to_string())
    }
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(_) => app_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
            RemoteError::RateLimited(_) => {
                app_error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", err.to_string())
            }
            RemoteError::Unreachable(_) => {
                app_error(StatusCode::BAD_GATEWAY, "remote_unreachable", err.to_string())
            }
        }
    }
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/sidebar ============

async fn handle_sidebar(State(state): State<AppState>) -> Response {
    let index = state.coordinator.current_index().await;
    (
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        index,
    )
        .into_response()
}

// ============ POST /api/update-sidebar ============

#[derive(Serialize)]
struct UpdateResponse {
    success: bool,
    message: String,
    content: String,
}

async fn handle_update_sidebar(
    State(state): State<AppState>,
) -> Result<Json<UpdateResponse>, AppError> {
    let content = state.coordinator.trigger_sync().await?;
    Ok(Json(UpdateResponse {
        success: true,
        message: "Sidebar updated successfully".to_string(),
        content,
    }))
}

// ============ GET /api/content ============

#[derive(Serialize)]
struct CategoryContent {
    name: String,
    label: String,
    items: Vec<ContentDescriptor>,
}

#[derive(Serialize)]
struct ContentResponse {
    categories: Vec<CategoryContent>,
    partial: bool,
    taken_at: Option<DateTime<Utc>>,
}

async fn handle_content(State(state): State<AppState>) -> Json<ContentResponse> {
    if state.coordinator.current_snapshot().is_none() {
        state.coordinator.current_index().await;
    }
    let snapshot = state.coordinator.current_snapshot();

    let categories = state
        .categories
        .iter()
        .map(|category| CategoryContent {
            name: category.name.clone(),
            label: category.label.clone(),
            items: snapshot
                .as_ref()
                .map(|s| s.in_category(&category.name).cloned().collect())
                .unwrap_or_default(),
        })
        .collect();

    Json(ContentResponse {
        categories,
        partial: snapshot.as_ref().is_some_and(|s| s.is_partial()),
        taken_at: snapshot.as_ref().map(|s| s.taken_at),
    })
}

// ============ POST /api/notify-change ============

#[derive(Serialize)]
struct NotifyResponse {
    success: bool,
    message: String,
    timestamp: DateTime<Utc>,
}

async fn handle_notify_change(State(state): State<AppState>) -> impl IntoResponse {
    state.coordinator.notify_changed();
    (
        StatusCode::ACCEPTED,
        Json(NotifyResponse {
            success: true,
            message: "Change noted, sidebar refresh queued".to_string(),
            timestamp: Utc::now(),
        }),
    )
}

// ============ POST /api/webhook ============

#[derive(Serialize)]
struct WebhookResponse {
    message: String,
    processed: bool,
    timestamp: DateTime<Utc>,
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> Json<WebhookResponse> {
    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok());
    let verdict = state.classifier.classify(event, &payload);
    info!(
        event = event.unwrap_or("-"),
        git_ref = payload.git_ref.as_deref().unwrap_or("-"),
        relevant = verdict.relevant,
        content_changed = verdict.content_changed,
        "webhook received"
    );

    if verdict.should_sync() {
        state.coordinator.notify_changed();
    }

    Json(WebhookResponse {
        message: "Webhook processed successfully".to_string(),
        processed: verdict.relevant,
        timestamp: Utc::now(),
    })
}

// ============ GET /api/status ============

async fn handle_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.coordinator.status())
}

// ============ POST /api/save-content ============

#[derive(Deserialize)]
struct SaveRequest {
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    entry: Option<SaveEntry>,
}

#[derive(Deserialize)]
struct SaveEntry {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    data: Map<String, Value>,
}

#[derive(Serialize)]
struct SaveResponse {
    success: bool,
    message: String,
    path: String,
}

async fn handle_save_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SaveRequest>,
) -> Result<Json<SaveResponse>, AppError> {
    let token = require_token(&headers)?;
    let (collection, entry) = match (req.collection, req.entry) {
        (Some(c), Some(e)) if !c.trim().is_empty() => (c, e),
        _ => return Err(bad_request("collection and entry are required")),
    };
    if !state.categories.iter().any(|c| c.name == collection) {
        return Err(bad_request(format!("unknown collection: '{}'", collection)));
    }

    let title = entry.data.get("title").and_then(Value::as_str);
    let slug = slugify(entry.slug.as_deref().or(title).unwrap_or(""));
    let path = format!("{}/{}.md", collection, slug);
    let body = entry.data.get("body").and_then(Value::as_str).unwrap_or("");
    let content = compose(&entry.data, body);

    state
        .store
        .write_file(
            &path,
            content.as_bytes(),
            &format!("Update {}", path),
            &token,
        )
        .await?;
    info!(path = %path, "content saved");
    state.coordinator.notify_changed();

    Ok(Json(SaveResponse {
        success: true,
        message: "Content saved successfully".to_string(),
        path,
    }))
}

fn require_token(headers: &HeaderMap) -> Result<String, AppError> {
    bearer_token(headers).ok_or_else(|| {
        app_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "an Authorization token is required",
        )
    })
}

// ============ POST /api/create-pr ============

#[derive(Deserialize)]
struct CreatePrRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct CreatePrResponse {
    success: bool,
    pr_url: String,
    pr_number: u64,
    branch: String,
}

async fn handle_create_pr(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePrRequest>,
) -> Result<Json<CreatePrResponse>, AppError> {
    let token = require_token(&headers)?;
    let branch = format!("content-update-{}", Utc::now().timestamp_millis());
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Content Update via CMS".to_string());
    let body = req
        .description
        .unwrap_or_else(|| "Automated content update from the CMS".to_string());

    state.store.create_branch(&branch, &token).await?;
    let pr = state
        .store
        .create_pull_request(&title, &body, &branch, &token)
        .await?;
    info!(branch = %branch, number = pr.number, "pull request opened");

    Ok(Json(CreatePrResponse {
        success: true,
        pr_url: pr.html_url,
        pr_number: pr.number,
        branch,
    }))
}

/// Extract the caller's opaque token from `Authorization: token <t>` or
/// `Authorization: Bearer <t>`.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("token ")
        .or_else(|| value.strip_prefix("Bearer "))
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// File slug: lower-cased, whitespace runs become `-`, anything outside
/// `[a-z0-9_-]` is dropped. Empty results become `untitled`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut in_space = false;
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            slug.push(c);
        }
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

// ============ GET /ws ============

#[derive(Serialize)]
struct ConnectedFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'static str,
    timestamp: DateTime<Utc>,
}

async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let mut subscription = state.coordinator.broadcaster().subscribe();
    let observer = subscription.id();
    debug!(observer, "websocket observer connected");

    let hello = ConnectedFrame {
        kind: "connected",
        message: "Real-time updates enabled",
        timestamp: Utc::now(),
    };
    if let Ok(text) = serde_json::to_string(&hello) {
        if sink.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str().trim() == VISIBILITY_FRAME {
                            state.coordinator.schedule(TriggerSource::Visibility);
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!(observer, "websocket observer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn slug_from_title() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("  What's   New?  "), "whats-new");
        assert_eq!(slugify("snake_case-ok"), "snake_case-ok");
        assert_eq!(slugify("!!!"), "untitled");
        assert_eq!(slugify(""), "untitled");
    }

    #[test]
    fn slug_cannot_escape_collection() {
        assert_eq!(slugify("../../etc/passwd"), "etcpasswd");
    }

    #[test]
    fn token_header_forms() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("token abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("token "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn remote_errors_map_to_statuses() {
        let err: AppError = RemoteError::RateLimited("x".into()).into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        let err: AppError = RemoteError::Unreachable("x".into()).into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        let err: AppError = SyncError::NoCategories(3).into();
        assert_eq!(err.code, "sync_failed");
    }
}
