//! Per-job execution wrapper.
//!
//! [`ExecutingTask`] runs one [`Task`] on behalf of one submission, locally
//! or inside a worker. Ordering of a run:
//!
//! 1. progress instrumentation installed
//! 2. submitter identity installed as the task-local scope
//! 3. `on_start`
//! 4. task body
//! 5. identity scope ends and instrumentation is torn down
//! 6. `on_finish` or `on_failure`
//!
//! Step 5 happens on every exit path, panics included.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use taskgrid_core::{TaskCommand, TaskFailure, TaskId, TaskResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::progress::{Instrumentation, LogSink, ProgressSink};
use crate::security;
use crate::task::{Task, TaskContext};

/// Hooks around a task body.
pub trait TaskLifecycleHandler: Send + Sync {
    fn on_start(&self, _task_id: &TaskId) {}

    fn on_finish(&self, _task_id: &TaskId) {}

    fn on_failure(&self, _task_id: &TaskId, _failure: &TaskFailure) {}
}

struct NoopLifecycle;

impl TaskLifecycleHandler for NoopLifecycle {}

/// A task bound to the command it executes.
pub struct ExecutingTask {
    task: Arc<dyn Task>,
    command: TaskCommand,
    task_id: TaskId,
    sink: Arc<dyn ProgressSink>,
    lifecycle: Arc<dyn TaskLifecycleHandler>,
}

impl ExecutingTask {
    /// Wrap `task`. The command gets an id if it has none.
    pub fn new(task: Arc<dyn Task>, mut command: TaskCommand) -> Self {
        let task_id = command.ensure_task_id();
        Self {
            task,
            command,
            task_id,
            sink: Arc::new(LogSink),
            lifecycle: Arc::new(NoopLifecycle),
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn TaskLifecycleHandler>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Run the task to completion. Never fails: task errors and panics are
    /// captured in the returned result.
    pub async fn call(self, cancel: CancellationToken) -> TaskResult {
        let Self {
            task,
            command,
            task_id,
            sink,
            lifecycle,
        } = self;
        let identity = command.security_context.clone();

        let outcome = {
            let instrumentation = Instrumentation::install(task_id.clone(), sink);
            let ctx = TaskContext::new(command, instrumentation.reporter(), cancel);

            security::scope(identity, async {
                lifecycle.on_start(&task_id);
                AssertUnwindSafe(task.execute(ctx)).catch_unwind().await
            })
            .await
        };

        match outcome {
            Ok(Ok(answer)) => {
                info!(task_id = %task_id, "Task finished");
                lifecycle.on_finish(&task_id);
                TaskResult::success(task_id, answer)
            }
            Ok(Err(err)) => {
                let failure = err.into_failure();
                warn!(task_id = %task_id, kind = %failure.kind, error = %failure.message, "Task failed");
                lifecycle.on_failure(&task_id, &failure);
                TaskResult::failure(task_id, failure)
            }
            Err(panic) => {
                let failure = TaskFailure::new(TaskFailure::PANIC, panic_message(&*panic));
                warn!(task_id = %task_id, error = %failure.message, "Task panicked");
                lifecycle.on_failure(&task_id, &failure);
                TaskResult::failure(task_id, failure)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
