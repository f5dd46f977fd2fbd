//! Worker list handler.

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::http::responses::WorkerResponse;
use crate::http::ApiState;

/// List workers as JSON. Empty when the engine runs without a hub.
pub async fn list_workers_json(State(state): State<Arc<ApiState>>) -> Json<Vec<WorkerResponse>> {
    let workers = match &state.hub {
        Some(hub) => hub.workers().await,
        None => Vec::new(),
    };
    Json(workers.iter().map(WorkerResponse::from).collect())
}
