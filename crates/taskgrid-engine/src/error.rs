//! Errors returned by the engine's submission and query operations.

use taskgrid_core::{CoreError, TaskId};
use thiserror::Error;

/// Submission, lookup and administrative errors.
///
/// Failures of a task body are never reported through this type while the
/// task runs; they become [`taskgrid_core::TaskResult`] data and only
/// surface here when a caller asks for the payload of a failed task.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A {task_type} job submitted by the same user is already running as {existing}")]
    ConflictingTask { existing: TaskId, task_type: String },

    #[error("Remote execution unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task {0} has not finished yet")]
    NotReady(TaskId),

    #[error("Task {0} already finished")]
    AlreadyFinished(TaskId),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Task {task_id} failed ({kind}): {message}")]
    TaskFailed {
        task_id: TaskId,
        kind: String,
        message: String,
    },

    #[error("Task {0} was cancelled")]
    Cancelled(TaskId),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Task id already in use: {0}")]
    DuplicateTaskId(TaskId),

    #[error("Task service is shutting down")]
    ShuttingDown,
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        EngineError::InvalidCommand(err.to_string())
    }
}
