//! Out-of-band messages for tasks that are already running.

use serde::{Deserialize, Serialize};

use crate::TaskId;

/// What a control message asks of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
    /// Stop the task as soon as it observes the request.
    Cancel,
    /// Notify the submitter by mail when the task ends.
    AddEmailNotification,
}

/// Control message addressed to one task. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskControl {
    pub task_id: TaskId,
    pub request: ControlRequest,
}

impl TaskControl {
    /// Request cancellation of a task.
    pub fn cancel(task_id: TaskId) -> Self {
        Self {
            task_id,
            request: ControlRequest::Cancel,
        }
    }

    /// Request a completion notice for a task.
    pub fn add_email_notification(task_id: TaskId) -> Self {
        Self {
            task_id,
            request: ControlRequest::AddEmailNotification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let control = TaskControl::cancel(TaskId::new("t-1"));
        let json = serde_json::to_string(&control).unwrap();
        assert_eq!(json, r#"{"task_id":"t-1","request":"CANCEL"}"#);

        let email = TaskControl::add_email_notification(TaskId::new("t-2"));
        let json = serde_json::to_string(&email).unwrap();
        assert!(json.contains("ADD_EMAIL_NOTIFICATION"));
    }
}
