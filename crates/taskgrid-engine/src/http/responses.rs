//! HTTP request and response types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use taskgrid_core::{ProgressEntry, TaskFailure, TaskResult, TaskState, WorkerStatus};

use crate::error::EngineError;
use crate::grid_monitor::GridStatus;
use crate::remote::ConnectedWorker;
use crate::submitted::SubmittedTask;

// ============================================================================
// Task types
// ============================================================================

/// Request body for submitting a task.
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_type: String,

    /// Caller-chosen id; generated when absent.
    #[serde(default)]
    pub task_id: Option<String>,

    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub parameters: serde_json::Value,

    /// Prefer a remote worker.
    #[serde(default)]
    pub remote: bool,

    /// Fail instead of running locally when no worker can take the task.
    #[serde(default)]
    pub remote_only: bool,

    #[serde(default)]
    pub max_queue_minutes: Option<u32>,

    #[serde(default)]
    pub max_runtime_minutes: Option<u32>,

    #[serde(default)]
    pub email_alert: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: String,
}

/// Summary of one tracked task.
#[derive(Debug, Serialize)]
pub struct TaskSummaryResponse {
    pub task_id: String,
    pub task_type: String,
    pub target: Option<String>,
    pub submitter: String,
    pub state: TaskState,
    pub submitted_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub worker_id: Option<String>,
    pub progress_entries: usize,
    pub email_alert: bool,
}

impl TaskSummaryResponse {
    pub fn from_task(task: &SubmittedTask) -> Self {
        Self {
            task_id: task.task_id().to_string(),
            task_type: task.signature().task_type.clone(),
            target: task.signature().target.clone(),
            submitter: task.submitter().principal.clone(),
            state: task.status(),
            submitted_at: task.submitted_at().map(|t| t.to_rfc3339()),
            started_at: task.started_at().map(|t| t.to_rfc3339()),
            finished_at: task.finished_at().map(|t| t.to_rfc3339()),
            worker_id: task.worker_id().map(|w| w.to_string()),
            progress_entries: task.progress_len(),
            email_alert: task.email_requested(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub task_id: String,
    pub state: TaskState,
    pub offset: usize,
    /// Offset to poll from next.
    pub next_offset: usize,
    pub entries: Vec<ProgressEntry>,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub task_id: String,
    pub state: TaskState,
    pub answer: Option<serde_json::Value>,
    pub failure: Option<TaskFailure>,
    pub finished_at: String,
    pub ran_remotely: bool,
}

impl ResultResponse {
    pub fn new(state: TaskState, result: TaskResult) -> Self {
        Self {
            task_id: result.task_id.to_string(),
            state,
            answer: result.answer,
            failure: result.failure,
            finished_at: result.finished_at.to_rfc3339(),
            ran_remotely: result.ran_remotely,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: String,
    pub cancelled: bool,
}

// ============================================================================
// Worker and health types
// ============================================================================

/// Response for a single worker.
#[derive(Debug, Serialize)]
pub struct WorkerResponse {
    pub worker_id: String,
    pub hostname: String,
    pub version: String,
    pub status: WorkerStatus,
    pub task_types: Vec<String>,
    pub active_tasks: u32,
    pub max_concurrent: u32,
    pub connected_at: String,
    pub last_heartbeat: String,
}

impl From<&ConnectedWorker> for WorkerResponse {
    fn from(w: &ConnectedWorker) -> Self {
        Self {
            worker_id: w.info.worker_id.to_string(),
            hostname: w.info.hostname.clone(),
            version: w.info.version.clone(),
            status: w.status,
            task_types: w.info.task_types.clone(),
            active_tasks: w.active_tasks,
            max_concurrent: w.info.max_concurrent,
            connected_at: w.connected_at.to_rfc3339(),
            last_heartbeat: w.last_heartbeat.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub tracked_tasks: usize,
    pub workers: usize,
    pub grid: Option<GridStatus>,
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_task_id: Option<String>,
}

/// Engine error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ConflictingTask { .. }
            | EngineError::DuplicateTaskId(_)
            | EngineError::NotReady(_)
            | EngineError::AlreadyFinished(_) => StatusCode::CONFLICT,
            EngineError::AccessDenied(_) => StatusCode::FORBIDDEN,
            EngineError::UnknownTaskType(_) | EngineError::InvalidCommand(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::TaskFailed { .. } | EngineError::Cancelled(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::RemoteUnavailable(_) | EngineError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let conflicting_task_id = match &self.0 {
            EngineError::ConflictingTask { existing, .. } => Some(existing.to_string()),
            _ => None,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                conflicting_task_id,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgrid_core::TaskId;

    #[test]
    fn test_error_status_codes() {
        let conflict = ApiError(EngineError::ConflictingTask {
            existing: TaskId::new("t-1"),
            task_type: "report".to_string(),
        });
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError(EngineError::NotFound(TaskId::new("t-1"))).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(EngineError::AccessDenied("no".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError(EngineError::RemoteUnavailable("none".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);
    }
}
