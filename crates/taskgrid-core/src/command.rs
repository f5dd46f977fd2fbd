//! Job descriptors.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{CoreError, SecurityContext, TaskId, WorkerId};

/// How long a command may wait in a queue before it is cancelled.
pub const DEFAULT_MAX_QUEUE_MINUTES: u32 = 120;

/// Comparable identity of a job, used to detect duplicate submissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobSignature {
    /// Catalog name of the task implementation.
    pub task_type: String,

    /// Entity the job concerns, if any.
    pub target: Option<String>,
}

impl JobSignature {
    /// Two signatures collide when the task types match and either side
    /// leaves the target open or both name the same target.
    pub fn conflicts_with(&self, other: &JobSignature) -> bool {
        if self.task_type != other.task_type {
            return false;
        }
        match (&self.target, &other.target) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// Routing metadata stamped when a command is forwarded to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    /// Declared task type the worker must resolve.
    pub task_type: String,

    /// Worker the command was handed to.
    pub worker_id: WorkerId,
}

/// Descriptor of one job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCommand {
    /// Task identifier, generated at submission if absent.
    pub task_id: Option<TaskId>,

    /// Catalog name of the task implementation.
    pub task_type: String,

    /// Identity of the submitter, captured at submission time.
    pub security_context: SecurityContext,

    /// Refuse local fallback when no worker can take the job.
    pub remote_only: bool,

    /// When the command entered the registry.
    pub submission_time: Option<DateTime<Utc>>,

    /// When the task body started executing.
    pub start_time: Option<DateTime<Utc>>,

    /// Entity the job concerns (experiment, platform, ...).
    pub target: Option<String>,

    /// Task-specific parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,

    /// Set by the remote interceptor before hand-off.
    pub routing: Option<Routing>,

    /// Maximum time the job may stay queued.
    pub max_queue_minutes: u32,

    /// Maximum time the job may run; unlimited if absent.
    pub max_runtime_minutes: Option<u32>,

    /// Send a completion notice to the submitter.
    pub email_alert: bool,
}

impl TaskCommand {
    /// Create a command for a task type on behalf of a submitter.
    pub fn new(task_type: impl Into<String>, security_context: SecurityContext) -> Self {
        Self {
            task_id: None,
            task_type: task_type.into(),
            security_context,
            remote_only: false,
            submission_time: None,
            start_time: None,
            target: None,
            parameters: serde_json::Value::Null,
            routing: None,
            max_queue_minutes: DEFAULT_MAX_QUEUE_MINUTES,
            max_runtime_minutes: None,
            email_alert: false,
        }
    }

    /// Builder method to set a specific ID.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.task_id = Some(id);
        self
    }

    /// Builder method to set the target entity.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Builder method to set the parameters.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Builder method to forbid local fallback.
    pub fn remote_only(mut self) -> Self {
        self.remote_only = true;
        self
    }

    /// Builder method to bound the running time.
    pub fn with_max_runtime_minutes(mut self, minutes: u32) -> Self {
        self.max_runtime_minutes = Some(minutes);
        self
    }

    /// Assign an identifier unless one is already present; returns it.
    pub fn ensure_task_id(&mut self) -> TaskId {
        self.task_id.get_or_insert_with(TaskId::generate).clone()
    }

    /// Name of the submitting principal.
    pub fn submitter(&self) -> &str {
        &self.security_context.principal
    }

    /// Signature used for conflict detection.
    pub fn signature(&self) -> JobSignature {
        JobSignature {
            task_type: self.task_type.clone(),
            target: self.target.clone(),
        }
    }

    /// Decode the parameters into a typed value.
    pub fn parameters_as<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        Ok(serde_json::from_value(self.parameters.clone())?)
    }
}
