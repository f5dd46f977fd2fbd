//! Messages exchanged over a worker connection.

use serde::{Deserialize, Serialize};

use taskgrid_core::{
    ProgressEntry, TaskCommand, TaskControl, TaskId, TaskResult, WorkerId, WorkerInfo,
    WorkerStatus,
};

/// Messages sent by a worker to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// First message on a connection: registers the worker.
    Hello { info: WorkerInfo },

    /// Periodic liveness and load report.
    Heartbeat {
        worker_id: WorkerId,
        status: WorkerStatus,
        active_tasks: u32,
        timestamp_ms: i64,
    },

    /// The task body began executing. Sent before any progress for the task.
    Started { task_id: TaskId, timestamp_ms: i64 },

    /// A progress entry emitted by the task body.
    Progress { task_id: TaskId, entry: ProgressEntry },

    /// Final outcome of a task.
    Completed { result: TaskResult },

    /// Worker is shutting down and deregisters itself.
    Goodbye { worker_id: WorkerId },
}

impl WorkerMessage {
    /// Build a Started notification stamped with the current time.
    pub fn started(task_id: TaskId) -> Self {
        Self::Started {
            task_id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Task this message concerns, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Started { task_id, .. } | Self::Progress { task_id, .. } => Some(task_id),
            Self::Completed { result } => Some(&result.task_id),
            _ => None,
        }
    }
}

/// Messages sent by the hub to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// Registration accepted.
    Welcome { worker_id: WorkerId },

    /// Execute a command. Routing metadata is already stamped.
    Assign { command: TaskCommand },

    /// Out-of-band request for a task the worker holds.
    Control { control: TaskControl },
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgrid_core::SecurityContext;

    #[test]
    fn test_tagged_representation() {
        let msg = WorkerMessage::started(TaskId::new("t-1"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "started");
        assert_eq!(json["task_id"], "t-1");
    }

    #[test]
    fn test_task_id_accessor() {
        let progress = WorkerMessage::Progress {
            task_id: TaskId::new("t-2"),
            entry: ProgressEntry::new(10, "loading"),
        };
        assert_eq!(progress.task_id(), Some(&TaskId::new("t-2")));

        let goodbye = WorkerMessage::Goodbye {
            worker_id: WorkerId::new("w"),
        };
        assert_eq!(goodbye.task_id(), None);
    }

    #[test]
    fn test_assign_carries_security_context() {
        let command = TaskCommand::new("monitor", SecurityContext::new("alice"))
            .with_id(TaskId::new("t-3"));
        let json = serde_json::to_string(&HubMessage::Assign { command }).unwrap();
        assert!(json.contains("\"principal\":\"alice\""));
    }
}
