//! Worker information types.

use serde::{Deserialize, Serialize};

use crate::WorkerId;

/// Information a worker announces when it registers with the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique worker identifier.
    pub worker_id: WorkerId,

    /// Hostname of the worker machine.
    pub hostname: String,

    /// Worker binary version.
    pub version: String,

    /// Task types this worker can resolve.
    pub task_types: Vec<String>,

    /// Maximum number of tasks executed at once.
    pub max_concurrent: u32,
}

impl WorkerInfo {
    /// Create a new WorkerInfo.
    pub fn new(worker_id: WorkerId, hostname: impl Into<String>) -> Self {
        Self {
            worker_id,
            hostname: hostname.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            task_types: Vec::new(),
            max_concurrent: 1,
        }
    }

    /// Check if this worker can run a given task type.
    pub fn supports(&self, task_type: &str) -> bool {
        self.task_types.iter().any(|t| t == task_type)
    }

    /// Builder method to add a task type.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_types.push(task_type.into());
        self
    }

    /// Builder method to set the concurrency limit.
    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}
