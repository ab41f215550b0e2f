use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use roster_registry::{RegistrationError, UserStore};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Payload returned by the simulated content loader.
pub const DYNAMIC_CONTENT: &str = "This content was loaded dynamically!";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore + Send + Sync>,
    pub node_id: String,
    pub start_time: Instant,
    /// Fixed delay applied by `/api/load-content`.
    pub content_delay: Duration,
    pub ui_dist: Option<PathBuf>,
    pub req_count: Arc<AtomicUsize>,
}

impl AppState {
    fn record_request(&self) -> u64 {
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn registered_users(&self) -> usize {
        self.store.len()
    }

    fn static_assets_root(&self) -> Option<PathBuf> {
        self.ui_dist.clone()
    }
}

pub(crate) type SharedState = Arc<AppState>;

/// Registration outcome envelope. The `message` strings are part of the
/// external contract.
#[derive(Debug, Serialize)]
struct ApiMessage {
    status: &'static str,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    newsletter: bool,
}

#[derive(Debug, Serialize)]
struct ContentResponse {
    content: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    node_id: String,
    uptime_secs: u64,
    registered_users: usize,
    req_total: u64,
    content_delay_ms: u64,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    node_id: String,
    version: &'static str,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ApiMessage {
            status: "error",
            message: self.message,
        });
        (self.status, payload).into_response()
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let shared = Arc::new(state);
    let app = build_router(shared);
    let listener = bind_listener(addr).await?;
    axum::serve(listener, app)
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))
    }
}

pub(crate) fn build_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/api/register", post(handle_register))
        .route("/api/load-content", get(handle_load_content))
        .route("/health", get(handle_health))
        .route("/version", get(handle_version))
        .route("/metrics", get(handle_metrics));

    if let Some(static_root) = state.static_assets_root() {
        if Path::new(&static_root).exists() {
            info!("Serving form UI assets from {:?}", static_root);
            router = router.fallback(serve_static_assets);
        } else {
            warn!("UI assets directory {:?} does not exist", static_root);
        }
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn serve_static_assets(State(state): State<SharedState>, req: Request<Body>) -> Response {
    if let Some(static_root) = state.static_assets_root() {
        if Path::new(&static_root).exists() {
            let index_path = static_root.join("index.html");
            let service = ServeDir::new(static_root)
                .append_index_html_on_directories(true)
                .not_found_service(ServeFile::new(index_path));

            match service.oneshot(req).await {
                Ok(response) => response.into_response(),
                Err(err) => {
                    warn!("Static asset error: {}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to serve static asset: {err}"),
                    )
                        .into_response()
                }
            }
        } else {
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    } else {
        (StatusCode::NOT_FOUND, "Not Found").into_response()
    }
}

async fn handle_register(
    State(state): State<SharedState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    state.record_request();

    state
        .store
        .register(&request.username, &request.role, request.newsletter)?;

    Ok(Json(ApiMessage {
        status: "success",
        message: "Registration successful".to_string(),
    }))
}

async fn handle_load_content(State(state): State<SharedState>) -> Json<ContentResponse> {
    state.record_request();

    // Simulated upstream latency. Runs on the timer only; the roster lock is
    // never held across this await.
    tokio::time::sleep(state.content_delay).await;

    Json(ContentResponse {
        content: DYNAMIC_CONTENT,
    })
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request();

    Json(HealthResponse {
        status: "ok",
        node_id: state.node_id.clone(),
        uptime_secs: state.uptime_seconds(),
        registered_users: state.registered_users(),
        req_total,
        content_delay_ms: state.content_delay.as_millis() as u64,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_version(State(state): State<SharedState>) -> Json<VersionResponse> {
    state.record_request();
    Json(VersionResponse {
        node_id: state.node_id.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_metrics(State(state): State<SharedState>) -> Response {
    let req_total = state.record_request();
    let uptime = state.uptime_seconds();
    let registered = state.registered_users();

    let mut metrics =
        "# HELP roster_http_requests_total Total number of HTTP requests handled\n".to_string();
    metrics.push_str("# TYPE roster_http_requests_total counter\n");
    metrics.push_str(&format!("roster_http_requests_total {req_total}\n"));
    metrics.push_str("# HELP roster_uptime_seconds Uptime of the server in seconds\n");
    metrics.push_str("# TYPE roster_uptime_seconds gauge\n");
    metrics.push_str(&format!("roster_uptime_seconds {uptime}\n"));
    metrics.push_str("# HELP roster_registered_users Number of users in the roster\n");
    metrics.push_str("# TYPE roster_registered_users gauge\n");
    metrics.push_str(&format!("roster_registered_users {registered}\n"));

    let mut response = Response::new(Body::from(metrics));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
