// HTTP route handlers for the pyharness API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use pyharness_common::types::ExecutionRequest;
use pyharness_engine::executor;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

/// POST /api/run - Execute a submission, optionally against test cases
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecutionRequest>,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4();

    info!(
        request_id = %request_id,
        mode = %payload.mode,
        test_cases = payload.test_cases.len(),
        source_size = payload.source_code.len(),
        "Request received"
    );

    let execution = executor::execute(&payload, state.sandbox.as_ref(), state.timeout).await;
    metrics::observe(&payload.mode.to_string(), &execution);

    info!(
        request_id = %request_id,
        success = execution.response.success,
        results = execution.outcome.as_str(),
        elapsed_ms = execution.elapsed.as_millis() as u64,
        "Request completed"
    );

    (StatusCode::OK, Json(execution.response))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
