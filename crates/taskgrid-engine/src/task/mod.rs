//! The `Task` abstraction executed by the engine and by workers.

mod catalog;
mod monitor;

pub use catalog::{TaskCatalog, TaskFactory};
pub use monitor::{MonitorParams, MonitorTask, MONITOR_TASK_TYPE};

use async_trait::async_trait;
use taskgrid_core::{CoreError, SecurityContext, TaskCommand, TaskFailure, TaskId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressReporter;

/// Failure raised by a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Task was cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Convert into the failure recorded in the task's result.
    pub fn into_failure(self) -> TaskFailure {
        let kind = match self {
            TaskError::Cancelled => TaskFailure::CANCELLED,
            _ => TaskFailure::EXECUTION,
        };
        TaskFailure::new(kind, self.to_string())
    }
}

impl From<CoreError> for TaskError {
    fn from(err: CoreError) -> Self {
        TaskError::InvalidParameters(err.to_string())
    }
}

/// Everything a task body gets to see about its job.
pub struct TaskContext {
    command: TaskCommand,
    task_id: TaskId,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(command: TaskCommand, progress: ProgressReporter, cancel: CancellationToken) -> Self {
        let task_id = progress.task_id().clone();
        Self {
            command,
            task_id,
            progress,
            cancel,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn command(&self) -> &TaskCommand {
        &self.command
    }

    /// Identity of the submitter.
    pub fn security(&self) -> &SecurityContext {
        &self.command.security_context
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Bail out with [`TaskError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// A unit of work a [`TaskCommand`] names.
///
/// Cancellation is cooperative: bodies should watch
/// [`TaskContext::cancelled`] at suspension points.
#[async_trait]
pub trait Task: Send + Sync {
    /// Run the job and return its payload.
    async fn execute(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskError>;

    /// Whether the same user may not run two conflicting jobs of this kind at once.
    fn exclusive_per_user(&self) -> bool {
        true
    }
}
