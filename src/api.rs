use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::{IntoParams, ToSchema};

use crate::pipeline::ContentPipeline;
use crate::proxy::{ProxyClient, ProxyError, ProxyRequest};
use crate::request_log::{ConnectionCounter, ConnectionGuard, LogEntry, RequestLog, RequestRecord};
use crate::strategy::StrategyId;

pub struct AppState {
    pub pipeline: ContentPipeline,
    pub proxy: ProxyClient,
    pub log: Arc<dyn RequestLog>,
    pub connections: Arc<dyn ConnectionCounter>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub target_url: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_requests: usize,
    pub error_count: usize,
    pub average_duration_ms: f64,
    pub active_connections: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ClearResponse {
    pub cleared: usize,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub strategies: Vec<StrategyId>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogsQuery {
    /// Maximum number of records, newest first.
    pub limit: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("targetUrl is required")]
    MissingTargetUrl,
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

fn proxy_status(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::InvalidUrl(_) | ProxyError::InvalidMethod(_) => StatusCode::BAD_REQUEST,
        ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingTargetUrl => StatusCode::BAD_REQUEST,
            ApiError::Proxy(e) => proxy_status(e),
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/content", post(fetch_content))
        .route("/proxy", post(proxy_request))
        .route("/logs", get(list_logs).delete(clear_logs))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn required_target(target_url: Option<&str>) -> Result<&str, ApiError> {
    match target_url.map(str::trim) {
        Some(url) if !url.is_empty() => Ok(url),
        _ => Err(ApiError::MissingTargetUrl),
    }
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn disable_caching(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store, no-cache, must-revalidate"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}

/// Fetch a page through the fallback chain and return it ready for framing.
#[utoipa::path(
    post,
    path = "/content",
    request_body = ContentRequest,
    responses(
        (status = 200, description = "Embeddable HTML document (real content or placeholder)", content_type = "text/html", body = String),
        (status = 400, description = "targetUrl missing", body = ErrorBody)
    ),
    tag = "relay"
)]
pub async fn fetch_content(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ContentRequest>,
) -> Result<Response, ApiError> {
    let target = required_target(payload.target_url.as_deref())?;
    let _connection = ConnectionGuard::acquire(state.connections.clone());
    let started = Instant::now();

    let outcome = state.pipeline.render(target).await;

    state.log.record(LogEntry {
        target_url: target.to_string(),
        method: "POST".to_string(),
        status_code: StatusCode::OK.as_u16(),
        duration_ms: started.elapsed().as_millis() as u64,
        response_size_bytes: outcome.html.len(),
        user_agent: user_agent(&headers),
        error_message: outcome
            .is_placeholder()
            .then(|| "all fetch strategies failed".to_string()),
    });

    let strategy = outcome.source_strategy.as_str();
    let mut response = (StatusCode::OK, outcome.html).into_response();
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    h.insert(header::CONTENT_SECURITY_POLICY, HeaderValue::from_static("frame-ancestors *"));
    h.insert(HeaderName::from_static("x-relay-strategy"), HeaderValue::from_static(strategy));
    disable_caching(h);
    Ok(response)
}

/// Relay a single request to the target as-is.
#[utoipa::path(
    post,
    path = "/proxy",
    request_body = ProxyRequest,
    responses(
        (status = 200, description = "Upstream response, status and body passed through"),
        (status = 400, description = "Missing or invalid target/method", body = ErrorBody),
        (status = 502, description = "Upstream unreachable", body = ErrorBody),
        (status = 504, description = "Upstream timed out", body = ErrorBody)
    ),
    tag = "proxy"
)]
pub async fn proxy_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ProxyRequest>,
) -> Result<Response, ApiError> {
    let target = required_target(payload.target_url.as_deref())?.to_string();
    let _connection = ConnectionGuard::acquire(state.connections.clone());
    let started = Instant::now();
    let method = payload.method.as_deref().unwrap_or("GET").to_ascii_uppercase();

    let result = state.proxy.relay(&target, &payload).await;

    let (status_code, size, error_message) = match &result {
        Ok(relayed) => (relayed.status, relayed.body.len(), None),
        Err(e) => {
            warn!(url = %target, error = %e, "Proxy request failed");
            (proxy_status(e).as_u16(), 0, Some(e.to_string()))
        }
    };
    state.log.record(LogEntry {
        target_url: target,
        method,
        status_code,
        duration_ms: started.elapsed().as_millis() as u64,
        response_size_bytes: size,
        user_agent: user_agent(&headers),
        error_message,
    });

    let relayed = result?;
    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, relayed.body).into_response();
    let h = response.headers_mut();
    if let Some(value) = relayed.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        h.insert(header::CONTENT_TYPE, value);
    }
    disable_caching(h);
    Ok(response)
}

#[utoipa::path(
    get,
    path = "/logs",
    params(LogsQuery),
    responses((status = 200, description = "Recent requests, newest first", body = [RequestRecord])),
    tag = "logs"
)]
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<RequestRecord>> {
    Json(state.log.list(query.limit))
}

#[utoipa::path(
    delete,
    path = "/logs",
    responses((status = 200, description = "Log cleared", body = ClearResponse)),
    tag = "logs"
)]
pub async fn clear_logs(State(state): State<Arc<AppState>>) -> Json<ClearResponse> {
    let cleared = state.log.count();
    state.log.clear();
    Json(ClearResponse { cleared })
}

#[utoipa::path(
    get,
    path = "/stats",
    responses((status = 200, description = "Request statistics", body = StatsResponse)),
    tag = "logs"
)]
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let summary = state.log.summary();
    Json(StatsResponse {
        total_requests: summary.total_requests,
        error_count: summary.error_count,
        average_duration_ms: summary.average_duration_ms,
        active_connections: state.connections.active(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "relay"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        strategies: state.pipeline.chain().strategies().iter().map(|d| d.id).collect(),
    })
}
