//! HTTP surface of the engine.
//!
//! Provides endpoints for:
//! - Task submission and listing (`/v1/tasks`)
//! - Task status, progress, result, cancel and email alerts (`/v1/tasks/:id/...`)
//! - Worker list API (`/v1/workers`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::grid_monitor::GridMonitor;
use crate::remote::DispatchHub;
use crate::service::{ProgressStatusService, TaskRunningService};

mod handlers;
pub mod identity;
pub mod responses;

pub use identity::{identity_from_headers, Caller};

/// Shared state behind every handler.
pub struct ApiState {
    pub tasks: Arc<TaskRunningService>,
    pub progress: ProgressStatusService,
    pub hub: Option<Arc<DispatchHub>>,
    pub monitor: Option<Arc<GridMonitor>>,
}

impl ApiState {
    pub fn new(tasks: Arc<TaskRunningService>) -> Self {
        let hub = tasks.dispatcher().map(|d| Arc::clone(d.hub()));
        Self {
            progress: ProgressStatusService::new(Arc::clone(&tasks)),
            tasks,
            hub,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<GridMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Task routes
        .route(
            "/v1/tasks",
            post(handlers::submit_task).get(handlers::list_tasks),
        )
        .route("/v1/tasks/:id", get(handlers::get_task))
        .route("/v1/tasks/:id/progress", get(handlers::get_progress))
        .route("/v1/tasks/:id/result", get(handlers::get_result))
        .route("/v1/tasks/:id/answer", get(handlers::check_result))
        .route("/v1/tasks/:id/cancel", post(handlers::cancel_task))
        .route("/v1/tasks/:id/email", post(handlers::add_email_alert))
        // Worker routes
        .route("/v1/workers", get(handlers::list_workers_json))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
