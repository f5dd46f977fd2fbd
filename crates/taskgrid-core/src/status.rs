//! Status enums for submitted tasks and workers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Lifecycle state of a submitted task.
///
/// `Queued -> Running -> {Finished, Failed, Cancelled}`, plus
/// `Queued -> Cancelled` for jobs withdrawn before they start.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Accepted, waiting for a pool slot or a remote worker to pick it up.
    #[default]
    Queued,
    /// The task body is executing.
    Running,
    /// Task returned a result.
    Finished,
    /// Task body failed, or the outcome was lost in transit.
    Failed,
    /// Task was cancelled by a user or by the system.
    Cancelled,
}

impl TaskState {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the task is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Validate a transition from `self` to `to`.
    pub fn check_transition(self, to: TaskState) -> Result<(), CoreError> {
        let allowed = match (self, to) {
            (Self::Queued, Self::Running) => true,
            (Self::Queued, Self::Cancelled) => true,
            (Self::Queued, Self::Failed) => true,
            (Self::Running, t) => t.is_terminal(),
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(CoreError::InvalidStateTransition { from: self, to })
        }
    }

    /// Upper-case name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a worker connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Worker is idle and ready to accept tasks.
    #[default]
    Idle,
    /// Worker is processing tasks.
    Busy,
    /// Worker is shutting down (not accepting new tasks).
    Draining,
}

impl WorkerStatus {
    /// Returns true if the worker can accept new tasks.
    pub fn can_accept_tasks(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }
}
