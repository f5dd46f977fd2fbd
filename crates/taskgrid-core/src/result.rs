//! Task outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskId;

/// A failure captured at the execution boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Machine-readable failure category.
    pub kind: String,

    /// Human-readable message.
    pub message: String,
}

impl TaskFailure {
    /// Task body returned an error.
    pub const EXECUTION: &'static str = "execution";
    /// Task body panicked.
    pub const PANIC: &'static str = "panic";
    /// Task observed a cancellation request.
    pub const CANCELLED: &'static str = "cancelled";
    /// Remote worker went away before reporting an outcome.
    pub const REMOTE_LOST: &'static str = "remote_lost";
    /// Remote registration lease ran out before an outcome arrived.
    pub const LEASE_EXPIRED: &'static str = "lease_expired";
    /// No capable worker could take a remote-only job.
    pub const REMOTE_UNAVAILABLE: &'static str = "remote_unavailable";
    /// The command named a task type nobody could resolve.
    pub const UNKNOWN_TASK_TYPE: &'static str = "unknown_task_type";

    /// Create a failure of the given kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Returns true if the failure records a cancellation.
    pub fn is_cancellation(&self) -> bool {
        self.kind == Self::CANCELLED
    }
}

/// Outcome of a completed or failed task. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task this result belongs to.
    pub task_id: TaskId,

    /// Payload returned by the task body.
    pub answer: Option<serde_json::Value>,

    /// Failure captured instead of a payload.
    pub failure: Option<TaskFailure>,

    /// When the outcome was produced.
    pub finished_at: DateTime<Utc>,

    /// True if a remote worker produced the outcome.
    pub ran_remotely: bool,
}

impl TaskResult {
    /// Successful outcome carrying a payload.
    pub fn success(task_id: TaskId, answer: serde_json::Value) -> Self {
        Self {
            task_id,
            answer: Some(answer),
            failure: None,
            finished_at: Utc::now(),
            ran_remotely: false,
        }
    }

    /// Failed outcome.
    pub fn failure(task_id: TaskId, failure: TaskFailure) -> Self {
        Self {
            task_id,
            answer: None,
            failure: Some(failure),
            finished_at: Utc::now(),
            ran_remotely: false,
        }
    }

    /// Outcome recorded for a task cancelled before it produced anything.
    pub fn cancelled(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self::failure(task_id, TaskFailure::new(TaskFailure::CANCELLED, reason))
    }

    /// Mark the outcome as produced remotely.
    pub fn remote(mut self) -> Self {
        self.ran_remotely = true;
        self
    }

    /// Returns true if the task returned a payload.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Message of the captured failure, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }
}
