//! Vigil HTTP REST API
//!
//! Axum-based HTTP server exposing recognition, registry control, report
//! verification and the live alert stream. Runs alongside the Unix socket IPC
//! server on port 8770 (configurable).
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`, so the logic is testable without
//! the dispatch machinery.
//!
//! Endpoints:
//! - GET   /health: health check with DB status
//! - GET   /version: server version info
//! - POST  /api/recognition: match one encoding
//! - POST  /api/recognition/batch: match several encodings against one snapshot
//! - GET   /api/registry: cached registry summary
//! - POST  /api/registry/invalidate: drop the cached registry
//! - GET   /api/alerts/stream: `match_found` events as Server-Sent Events
//! - GET   /api/reports/:id: fetch a detection report
//! - PATCH /api/reports/:id/verify: confirm or reject a detection

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;
use vigil_core::ipc::MatchItem;
use vigil_core::MatchError;

use crate::state::AppState;
use crate::subsystems::pipeline::MatchPipeline;
use crate::subsystems::reports::{verify_report, ReportError, ReportStore};

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/recognition", post(recognition_handler))
        .route("/api/recognition/batch", post(batch_handler))
        .route("/api/registry", get(registry_handler))
        .route("/api/registry/invalidate", post(invalidate_handler))
        .route("/api/alerts/stream", get(alerts_stream_handler))
        .route("/api/reports/:id", get(report_handler))
        .route("/api/reports/:id/verify", patch(verify_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Vigil HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct BatchRequest {
    /// `encodings` is the older name for the same list.
    #[serde(default, alias = "encodings")]
    pub items: Vec<MatchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(alias = "verification_status")]
    pub verification_status: String,
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

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: queries DB and returns (status_code, json_body).
pub async fn health_inner(pool: &PgPool, socket_path: &str) -> (StatusCode, serde_json::Value) {
    let pg_ver = match vigil_core::db::health_check(pool).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            );
        }
    };

    let pgvector_ver = match vigil_core::db::check_pgvector(pool).await {
        Ok(v) => v,
        Err(e) => format!("unavailable: {}", e),
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "postgresql": pg_ver,
            "pgvector": pgvector_ver,
            "socket": socket_path,
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "vigil/1",
    })
}

pub async fn recognition_inner(
    pipeline: &MatchPipeline,
    item: MatchItem,
) -> (StatusCode, serde_json::Value) {
    match pipeline.process(item).await {
        Ok(response) => json_ok(&response),
        Err(e) => match_error(&e),
    }
}

pub async fn batch_inner(
    pipeline: &MatchPipeline,
    req: BatchRequest,
) -> (StatusCode, serde_json::Value) {
    if req.items.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Array of items is required");
    }

    match pipeline.process_batch(req.items).await {
        Ok(response) => json_ok(&response),
        Err(e) => match_error(&e),
    }
}

pub async fn registry_inner(pipeline: &MatchPipeline) -> (StatusCode, serde_json::Value) {
    match pipeline.registry_status().await {
        Ok(status) => (StatusCode::OK, status),
        Err(e) => match_error(&e),
    }
}

pub fn invalidate_inner(pipeline: &MatchPipeline) -> (StatusCode, serde_json::Value) {
    pipeline.invalidate();
    (StatusCode::OK, serde_json::json!({ "invalidated": true }))
}

pub async fn report_inner(reports: &dyn ReportStore, id: Uuid) -> (StatusCode, serde_json::Value) {
    match reports.get(id).await {
        Ok(Some(report)) => json_ok(&report),
        Ok(None) => report_error(&ReportError::NotFound(id)),
        Err(e) => report_error(&ReportError::Store(e)),
    }
}

pub async fn verify_inner(
    reports: &dyn ReportStore,
    id: Uuid,
    req: VerifyRequest,
) -> (StatusCode, serde_json::Value) {
    match verify_report(reports, id, &req.verification_status).await {
        Ok(report) => json_ok(&report),
        Err(e) => report_error(&e),
    }
}

// ============================================================================
// Axum handlers (thin wrappers)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool, &state.config.service.socket_path).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn recognition_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MatchItem>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(item)) => recognition_inner(&state.pipeline, item).await,
        Err(rejection) => rejected_body(&rejection),
    };
    (status, Json(body))
}

pub async fn batch_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => batch_inner(&state.pipeline, req).await,
        Err(rejection) => rejected_body(&rejection),
    };
    (status, Json(body))
}

pub async fn registry_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = registry_inner(&state.pipeline).await;
    (status, Json(body))
}

pub async fn invalidate_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = invalidate_inner(&state.pipeline);
    (status, Json(body))
}

pub async fn report_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = report_inner(state.reports.as_ref(), id).await;
    (status, Json(body))
}

pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => verify_inner(state.reports.as_ref(), id, req).await,
        Err(rejection) => rejected_body(&rejection),
    };
    (status, Json(body))
}

pub async fn alerts_stream_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.hub.subscribe()).filter_map(|message| match message {
        Ok(event) => Event::default()
            .event("match_found")
            .json_data(&event)
            .ok()
            .map(Ok),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Alert stream subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// Helpers
// ============================================================================

/// HTTP status for a failed match attempt.
pub fn match_error_status(error: &MatchError) -> StatusCode {
    match error {
        MatchError::InvalidEncoding(_) => StatusCode::BAD_REQUEST,
        MatchError::RegistryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        MatchError::DimensionMismatch { .. } | MatchError::PersistenceFailure(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn match_error(error: &MatchError) -> (StatusCode, serde_json::Value) {
    error_body(match_error_status(error), error.to_string())
}

fn report_error(error: &ReportError) -> (StatusCode, serde_json::Value) {
    let status = match error {
        ReportError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
        ReportError::NotFound(_) => StatusCode::NOT_FOUND,
        ReportError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, error.to_string())
}

/// Unreadable request bodies answer in the same error shape as everything else.
fn rejected_body(rejection: &JsonRejection) -> (StatusCode, serde_json::Value) {
    tracing::debug!(error = %rejection.body_text(), "Rejected request body");
    error_body(StatusCode::BAD_REQUEST, rejection.body_text())
}

fn error_body(status: StatusCode, msg: impl Into<String>) -> (StatusCode, serde_json::Value) {
    let body = serde_json::to_value(ErrorResponse::new(msg))
        .unwrap_or_else(|_| serde_json::json!({ "status": "error" }));
    (status, body)
}

fn json_ok<T: Serialize>(value: &T) -> (StatusCode, serde_json::Value) {
    match serde_json::to_value(value) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Unit Tests: pure helpers; endpoint behaviour lives in tests/http_integration.rs
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "vigil/1");
    }

    #[test]
    fn test_match_error_status_mapping() {
        assert_eq!(
            match_error_status(&MatchError::InvalidEncoding("too short".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            match_error_status(&MatchError::RegistryUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            match_error_status(&MatchError::DimensionMismatch { left: 128, right: 3 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_batch_request_accepts_legacy_encodings_key() {
        let req: BatchRequest = serde_json::from_value(serde_json::json!({
            "encodings": [{ "encoding": [0.0, 1.0] }]
        }))
        .unwrap();
        assert_eq!(req.items.len(), 1);
    }

    #[test]
    fn test_verify_request_accepts_both_casings() {
        let camel: VerifyRequest =
            serde_json::from_value(serde_json::json!({ "verificationStatus": "confirmed" }))
                .unwrap();
        let snake: VerifyRequest =
            serde_json::from_value(serde_json::json!({ "verification_status": "false_positive" }))
                .unwrap();
        assert_eq!(camel.verification_status, "confirmed");
        assert_eq!(snake.verification_status, "false_positive");
    }

    #[test]
    fn test_error_body_shape() {
        let (status, body) = error_body(StatusCode::NOT_FOUND, "missing");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "missing");
        assert_eq!(body["status"], "error");
    }
}
