//! Health and metrics handlers.

use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};

use crate::http::responses::HealthResponse;
use crate::http::ApiState;

/// Health check endpoint. Includes the latest grid probe when one ran.
pub async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let workers = match &state.hub {
        Some(hub) => hub.workers().await.len(),
        None => 0,
    };
    let status = if state.tasks.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        tracked_tasks: state.tasks.registry().len().await,
        workers,
        grid: state.monitor.as_ref().and_then(|m| m.last_status()),
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let body = crate::metrics::collect_metrics(&state.tasks, state.hub.as_deref()).await;
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
