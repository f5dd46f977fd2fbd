//! Built-in task used to probe the grid.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use taskgrid_core::TaskCommand;
use tracing::debug;

use super::{Task, TaskContext, TaskError, TaskFactory};

pub const MONITOR_TASK_TYPE: &str = "monitor";

/// Parameters accepted by [`MonitorTask`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorParams {
    /// How long to sleep before answering.
    pub duration_ms: u64,

    /// Fail instead of answering.
    pub fail: bool,
}

/// Sleeps for a while, then answers or fails on request.
#[derive(Debug, Clone, Default)]
pub struct MonitorTask {
    params: MonitorParams,
}

impl MonitorTask {
    pub fn new(params: MonitorParams) -> Self {
        Self { params }
    }

    pub fn from_command(command: &TaskCommand) -> Result<Self, TaskError> {
        if command.parameters.is_null() {
            return Ok(Self::default());
        }
        Ok(Self::new(command.parameters_as()?))
    }

    pub(super) fn factory() -> impl TaskFactory {
        MonitorFactory
    }
}

struct MonitorFactory;

impl TaskFactory for MonitorFactory {
    fn create(&self, command: &TaskCommand) -> Result<Arc<dyn Task>, TaskError> {
        Ok(Arc::new(MonitorTask::from_command(command)?))
    }

    fn exclusive_per_user(&self) -> bool {
        false
    }
}

#[async_trait]
impl Task for MonitorTask {
    async fn execute(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskError> {
        ctx.progress().report(0, "Monitor task started");

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(self.params.duration_ms)) => {}
            _ = ctx.cancelled() => {
                debug!(task_id = %ctx.task_id(), "Monitor task cancelled");
                return Err(TaskError::Cancelled);
            }
        }

        if self.params.fail {
            return Err(TaskError::failed("Monitor task failed on request"));
        }

        ctx.progress().done("Monitor task finished");
        Ok(json!({ "slept_ms": self.params.duration_ms }))
    }

    fn exclusive_per_user(&self) -> bool {
        false
    }
}
