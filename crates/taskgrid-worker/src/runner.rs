//! Execution of assigned tasks inside the worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use taskgrid_core::{
    ControlRequest, ProgressEntry, TaskCommand, TaskControl, TaskFailure, TaskId, TaskResult,
};
use taskgrid_engine::{EngineError, ExecutingTask, ProgressSink, TaskCatalog, TaskLifecycleHandler};
use taskgrid_proto::WorkerMessage;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

struct ActiveTask {
    cancel: CancellationToken,
    email_requested: bool,
}

/// Runs assigned commands on a bounded set of slots and reports back
/// through the outbound channel.
///
/// For every task the hub sees `Started`, then its progress, then exactly
/// one `Completed`. Tasks withdrawn before a slot frees up skip straight to
/// `Completed`.
pub struct TaskRunner {
    catalog: Arc<TaskCatalog>,
    slots: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<TaskId, ActiveTask>>>,
    tracker: TaskTracker,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
}

impl TaskRunner {
    pub fn new(
        catalog: Arc<TaskCatalog>,
        max_concurrent: u32,
        outbound: mpsc::UnboundedSender<WorkerMessage>,
    ) -> Self {
        Self {
            catalog,
            slots: Arc::new(Semaphore::new(max_concurrent.max(1) as usize)),
            active: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            outbound,
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<TaskId, ActiveTask>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tasks assigned and not yet completed.
    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// True once shutdown has begun; new assignments are refused.
    pub fn is_draining(&self) -> bool {
        self.tracker.is_closed()
    }

    pub fn email_requested(&self, task_id: &TaskId) -> bool {
        self.active()
            .get(task_id)
            .is_some_and(|t| t.email_requested)
    }

    /// Accept an assignment and run it in the background.
    pub fn spawn(&self, mut command: TaskCommand) {
        let task_id = command.ensure_task_id();

        if self.tracker.is_closed() {
            warn!(task_id = %task_id, "Assignment received while draining");
            self.report(TaskResult::cancelled(task_id, "worker is shutting down"));
            return;
        }

        let task = match self.catalog.resolve(&command) {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Cannot run assignment");
                let kind = match e {
                    EngineError::UnknownTaskType(_) => TaskFailure::UNKNOWN_TASK_TYPE,
                    _ => TaskFailure::EXECUTION,
                };
                self.report(TaskResult::failure(
                    task_id,
                    TaskFailure::new(kind, e.to_string()),
                ));
                return;
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut active = self.active();
            if active.contains_key(&task_id) {
                warn!(task_id = %task_id, "Duplicate assignment ignored");
                return;
            }
            active.insert(
                task_id.clone(),
                ActiveTask {
                    cancel: cancel.clone(),
                    email_requested: command.email_alert,
                },
            );
        }
        info!(task_id = %task_id, task_type = %command.task_type, "Task assigned");

        let slots = Arc::clone(&self.slots);
        let active = Arc::clone(&self.active);
        let outbound = self.outbound.clone();
        self.tracker.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = slots.acquire_owned() => permit.ok(),
            };

            let result = match permit {
                None => TaskResult::cancelled(task_id.clone(), "cancelled before it started"),
                Some(_permit) => {
                    let reporter = Arc::new(Reporter {
                        outbound: outbound.clone(),
                    });
                    ExecutingTask::new(task, command)
                        .with_progress_sink(reporter.clone())
                        .with_lifecycle(reporter)
                        .call(cancel)
                        .await
                }
            };

            let finished = active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_id);
            if finished.is_some_and(|t| t.email_requested) {
                debug!(task_id = %task_id, "Submitter asked for a completion notice");
            }
            info!(task_id = %task_id, success = result.is_success(), "Task completed");
            if outbound.send(WorkerMessage::Completed { result }).is_err() {
                warn!(task_id = %task_id, "Connection gone; outcome dropped");
            }
        });
    }

    /// Apply an out-of-band request. Returns false for unknown tasks.
    pub fn control(&self, control: TaskControl) -> bool {
        let mut active = self.active();
        let Some(task) = active.get_mut(&control.task_id) else {
            debug!(task_id = %control.task_id, "Control for a task this worker does not hold");
            return false;
        };
        match control.request {
            ControlRequest::Cancel => {
                info!(task_id = %control.task_id, "Cancelling task");
                task.cancel.cancel();
            }
            ControlRequest::AddEmailNotification => {
                task.email_requested = true;
            }
        }
        true
    }

    /// Cancel every task still held.
    pub fn cancel_all(&self) {
        for task in self.active().values() {
            task.cancel.cancel();
        }
    }

    /// Stop accepting work, give running tasks `grace` to finish, then
    /// cancel the rest and wait for their outcomes.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return;
        }
        warn!(remaining = self.active_count(), "Grace period over; cancelling tasks");
        self.cancel_all();
        self.tracker.wait().await;
    }

    fn report(&self, result: TaskResult) {
        if self.outbound.send(WorkerMessage::Completed { result }).is_err() {
            warn!("Connection gone; outcome dropped");
        }
    }
}

/// Forwards lifecycle and progress of one task to the hub.
struct Reporter {
    outbound: mpsc::UnboundedSender<WorkerMessage>,
}

impl ProgressSink for Reporter {
    fn emit(&self, task_id: &TaskId, entry: ProgressEntry) {
        let msg = WorkerMessage::Progress {
            task_id: task_id.clone(),
            entry,
        };
        if self.outbound.send(msg).is_err() {
            debug!(task_id = %task_id, "Progress dropped; connection gone");
        }
    }
}

impl TaskLifecycleHandler for Reporter {
    fn on_start(&self, task_id: &TaskId) {
        if self.outbound.send(WorkerMessage::started(task_id.clone())).is_err() {
            debug!(task_id = %task_id, "Start notice dropped; connection gone");
        }
    }

    fn on_failure(&self, task_id: &TaskId, failure: &TaskFailure) {
        warn!(task_id = %task_id, kind = %failure.kind, error = %failure.message, "Task failed");
    }
}
