use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::handlers::{health_check, metrics_endpoint, run_code};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/run", post(run_code))
        // legacy path kept for editor clients
        .route("/run", post(run_code))
        .route("/status", get(health_check))
        .route("/metrics", get(metrics_endpoint))
}
