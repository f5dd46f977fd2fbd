//! Caller-facing handle of a submitted job.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use taskgrid_core::{
    JobSignature, ProgressEntry, Routing, SecurityContext, TaskCommand, TaskControl, TaskFailure,
    TaskId, TaskResult, TaskState, WorkerId,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::executing::TaskLifecycleHandler;
use crate::progress::ProgressSink;
use crate::remote::{ControlChannel, JobObserver};

/// Worker a remote job was handed to.
#[derive(Clone)]
struct RemoteBinding {
    worker_id: WorkerId,
    control: Arc<dyn ControlChannel>,
}

struct Tracking {
    state: TaskState,
    command: TaskCommand,
    progress: Vec<ProgressEntry>,
    result: Option<TaskResult>,
    cancel_requested: bool,
    finished_at: Option<DateTime<Utc>>,
    remote: Option<RemoteBinding>,
}

/// A job owned by the registry.
///
/// State moves `QUEUED -> RUNNING -> {FINISHED, FAILED, CANCELLED}` or
/// `QUEUED -> CANCELLED`; terminal states never change and the result is
/// set exactly once.
pub struct SubmittedTask {
    task_id: TaskId,
    submitter: SecurityContext,
    signature: JobSignature,
    exclusive: bool,
    inner: Mutex<Tracking>,
    cancel: CancellationToken,
    state_tx: watch::Sender<TaskState>,
}

impl SubmittedTask {
    /// Track `command`, which must already carry its id.
    pub(crate) fn new(mut command: TaskCommand, exclusive: bool) -> Arc<Self> {
        let task_id = command.ensure_task_id();
        if command.submission_time.is_none() {
            command.submission_time = Some(Utc::now());
        }
        let (state_tx, _) = watch::channel(TaskState::Queued);
        Arc::new(Self {
            task_id,
            submitter: command.security_context.clone(),
            signature: command.signature(),
            exclusive,
            inner: Mutex::new(Tracking {
                state: TaskState::Queued,
                command,
                progress: Vec::new(),
                result: None,
                cancel_requested: false,
                finished_at: None,
                remote: None,
            }),
            cancel: CancellationToken::new(),
            state_tx,
        })
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn submitter(&self) -> &SecurityContext {
        &self.submitter
    }

    pub fn signature(&self) -> &JobSignature {
        &self.signature
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Snapshot of the command as currently known (start time and routing
    /// are filled in as the job progresses).
    pub fn command(&self) -> TaskCommand {
        self.tracking().command.clone()
    }

    pub fn status(&self) -> TaskState {
        self.tracking().state
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Progress entries from `offset` on. Offsets past the end yield nothing.
    pub fn progress(&self, offset: usize) -> Vec<ProgressEntry> {
        let t = self.tracking();
        t.progress.get(offset..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn progress_len(&self) -> usize {
        self.tracking().progress.len()
    }

    /// Percentage of the latest entry, 0 before the first one.
    pub fn last_percent(&self) -> u8 {
        self.tracking().progress.last().map_or(0, |e| e.percent)
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.tracking().command.submission_time
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.tracking().command.start_time
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.tracking().finished_at
    }

    /// Worker a remote job runs on.
    pub fn worker_id(&self) -> Option<WorkerId> {
        self.tracking().remote.as_ref().map(|r| r.worker_id.clone())
    }

    pub fn email_requested(&self) -> bool {
        self.tracking().command.email_alert
    }

    pub fn cancel_requested(&self) -> bool {
        self.tracking().cancel_requested
    }

    /// The outcome, once terminal.
    pub fn result(&self) -> Result<TaskResult, EngineError> {
        self.tracking()
            .result
            .clone()
            .ok_or_else(|| EngineError::NotReady(self.task_id.clone()))
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.state_tx.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.status(),
        };
        state
    }

    /// Request cancellation.
    ///
    /// A queued job is cancelled on the spot. A running local job gets its
    /// cancellation token fired; a running remote job gets a
    /// `TaskControl(CANCEL)`. Returns false if the job is already terminal
    /// or the request could not be delivered.
    pub async fn cancel(&self) -> bool {
        let remote = {
            let mut t = self.tracking();
            let state = t.state;
            match state {
                _ if state.is_terminal() => {
                    debug!(task_id = %self.task_id, state = %state, "Cancel ignored for finished task");
                    return false;
                }
                TaskState::Queued => {
                    t.cancel_requested = true;
                    let result = TaskResult::cancelled(
                        self.task_id.clone(),
                        "Cancelled before the task started",
                    );
                    self.finish_locked(&mut t, result, TaskState::Cancelled);
                    self.cancel.cancel();
                    info!(task_id = %self.task_id, "Cancelled queued task");
                    // a remote worker may already hold the command
                    t.remote.clone().map(|binding| (binding, false))
                }
                _ => {
                    t.cancel_requested = true;
                    t.remote.clone().map(|binding| (binding, true))
                }
            }
        };

        match remote {
            None => {
                self.cancel.cancel();
                true
            }
            Some((binding, running)) => {
                let delivered = binding
                    .control
                    .send_control(&binding.worker_id, TaskControl::cancel(self.task_id.clone()))
                    .await;
                if !delivered {
                    warn!(task_id = %self.task_id, worker_id = %binding.worker_id, "Cancel request not delivered");
                }
                !running || delivered
            }
        }
    }

    /// Ask for a completion notice. Remote jobs also get a
    /// `TaskControl(ADD_EMAIL_NOTIFICATION)`.
    pub async fn add_email_notification(&self) -> Result<(), EngineError> {
        let remote = {
            let mut t = self.tracking();
            if t.state.is_terminal() {
                return Err(EngineError::AlreadyFinished(self.task_id.clone()));
            }
            t.command.email_alert = true;
            t.remote.clone()
        };

        if let Some(binding) = remote {
            let control = TaskControl::add_email_notification(self.task_id.clone());
            if !binding.control.send_control(&binding.worker_id, control).await {
                debug!(task_id = %self.task_id, "Email request not forwarded to worker");
            }
        }
        Ok(())
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Force a completion notice regardless of what the submitter asked for.
    pub(crate) fn request_email(&self) {
        self.tracking().command.email_alert = true;
    }

    /// Move QUEUED to RUNNING. False if the job left QUEUED in the meantime.
    pub(crate) fn begin_run(&self) -> bool {
        let mut t = self.tracking();
        if t.state.check_transition(TaskState::Running).is_err() {
            return false;
        }
        t.state = TaskState::Running;
        t.command.start_time = Some(Utc::now());
        drop(t);
        self.state_tx.send_replace(TaskState::Running);
        true
    }

    /// Record the remote worker holding the job.
    pub(crate) fn bind_remote(&self, routing: Routing, control: Arc<dyn ControlChannel>) {
        let mut t = self.tracking();
        t.remote = Some(RemoteBinding {
            worker_id: routing.worker_id.clone(),
            control,
        });
        t.command.routing = Some(routing);
    }

    /// Append a progress entry. Ignored once terminal.
    pub(crate) fn append_progress(&self, entry: ProgressEntry) -> bool {
        let mut t = self.tracking();
        if t.state.is_terminal() {
            debug!(task_id = %self.task_id, "Dropping progress for finished task");
            return false;
        }
        t.progress.push(entry);
        true
    }

    /// Record the outcome. The terminal state follows from it: a payload is
    /// FINISHED; a failure is CANCELLED when it was a cancellation or one was
    /// requested, FAILED otherwise. Returns false if already terminal.
    pub(crate) fn complete(&self, result: TaskResult) -> bool {
        let mut t = self.tracking();
        if t.state.is_terminal() {
            debug!(task_id = %self.task_id, "Ignoring outcome for finished task");
            return false;
        }
        let next = match &result.failure {
            None => TaskState::Finished,
            Some(f) if f.is_cancellation() || t.cancel_requested => TaskState::Cancelled,
            Some(_) => TaskState::Failed,
        };
        if t.state == TaskState::Queued && next == TaskState::Finished {
            // outcome arrived without a start notification
            t.state = TaskState::Running;
            t.command.start_time.get_or_insert_with(Utc::now);
        }
        self.finish_locked(&mut t, result, next);
        true
    }

    fn finish_locked(&self, t: &mut Tracking, result: TaskResult, state: TaskState) {
        if let Err(e) = t.state.check_transition(state) {
            warn!(task_id = %self.task_id, error = %e, "Unexpected transition");
        }
        t.state = state;
        t.finished_at = Some(result.finished_at);
        t.result = Some(result);
        self.state_tx.send_replace(state);
    }
}

impl ProgressSink for SubmittedTask {
    fn initialize(&self, task_id: &TaskId) {
        debug!(task_id = %task_id, "Progress tracking started");
    }

    fn emit(&self, _task_id: &TaskId, entry: ProgressEntry) {
        self.append_progress(entry);
    }

    fn tear_down(&self, task_id: &TaskId) {
        debug!(task_id = %task_id, entries = self.progress_len(), "Progress tracking finished");
    }
}

impl TaskLifecycleHandler for SubmittedTask {
    fn on_start(&self, task_id: &TaskId) {
        info!(task_id = %task_id, submitter = %self.submitter.principal, "Task started");
    }

    fn on_failure(&self, task_id: &TaskId, failure: &TaskFailure) {
        debug!(task_id = %task_id, kind = %failure.kind, "Task body failed");
    }
}

impl JobObserver for SubmittedTask {
    fn on_started(&self, task_id: &TaskId) {
        if self.begin_run() {
            info!(task_id = %task_id, "Remote task started");
        }
    }

    fn on_progress(&self, _task_id: &TaskId, entry: ProgressEntry) {
        self.append_progress(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn submitted() -> Arc<SubmittedTask> {
        let command = TaskCommand::new("report", SecurityContext::new("alice"))
            .with_id(TaskId::new("t-1"));
        SubmittedTask::new(command, true)
    }

    struct Recorder {
        sent: Mutex<Vec<TaskControl>>,
        deliver: AtomicBool,
    }

    impl Recorder {
        fn new(deliver: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                deliver: AtomicBool::new(deliver),
            })
        }
    }

    #[async_trait]
    impl ControlChannel for Recorder {
        async fn send_control(&self, _worker_id: &WorkerId, control: TaskControl) -> bool {
            self.sent.lock().unwrap().push(control);
            self.deliver.load(Ordering::SeqCst)
        }
    }

    fn routing() -> Routing {
        Routing {
            task_type: "report".to_string(),
            worker_id: WorkerId::new("w-1"),
        }
    }

    #[tokio::test]
    async fn test_cancel_while_queued() {
        let task = submitted();
        assert!(task.cancel().await);

        assert_eq!(task.status(), TaskState::Cancelled);
        assert!(task.cancellation_token().is_cancelled());
        let result = task.result().unwrap();
        assert!(result.failure.unwrap().is_cancellation());
        assert!(!task.begin_run());

        // terminal: further cancels are refused
        assert!(!task.cancel().await);
    }

    #[tokio::test]
    async fn test_running_then_finished() {
        let task = submitted();
        assert!(matches!(task.result(), Err(EngineError::NotReady(_))));

        assert!(task.begin_run());
        assert!(task.started_at().is_some());
        task.append_progress(ProgressEntry::new(50, "halfway"));
        assert!(task.complete(TaskResult::success(TaskId::new("t-1"), json!(42))));

        assert_eq!(task.status(), TaskState::Finished);
        assert_eq!(task.wait().await, TaskState::Finished);
        assert!(!task.append_progress(ProgressEntry::new(60, "late")));
        assert_eq!(task.progress(0).len(), 1);
    }

    #[tokio::test]
    async fn test_result_is_final() {
        let task = submitted();
        task.begin_run();
        task.complete(TaskResult::success(TaskId::new("t-1"), json!(1)));
        assert!(!task.complete(TaskResult::success(TaskId::new("t-1"), json!(2))));

        assert_eq!(task.result().unwrap().answer, Some(json!(1)));
        assert_eq!(task.result().unwrap().answer, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_cancel_running_local_outcomes() {
        let task = submitted();
        task.begin_run();
        assert!(task.cancel().await);
        assert!(task.cancellation_token().is_cancelled());
        assert_eq!(task.status(), TaskState::Running);

        task.complete(TaskResult::failure(
            TaskId::new("t-1"),
            TaskFailure::new(TaskFailure::EXECUTION, "interrupted"),
        ));
        assert_eq!(task.status(), TaskState::Cancelled);

        let other = submitted();
        other.begin_run();
        other.cancel().await;
        other.complete(TaskResult::success(TaskId::new("t-1"), json!("late")));
        assert_eq!(other.status(), TaskState::Finished);
    }

    #[tokio::test]
    async fn test_cancel_running_remote_sends_control() {
        let task = submitted();
        let channel = Recorder::new(true);
        task.bind_remote(routing(), channel.clone());
        task.begin_run();

        assert!(task.cancel().await);
        assert!(!task.cancellation_token().is_cancelled());
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], TaskControl::cancel(TaskId::new("t-1")));
    }

    #[tokio::test]
    async fn test_undelivered_remote_cancel() {
        let task = submitted();
        task.bind_remote(routing(), Recorder::new(false));
        task.begin_run();
        assert!(!task.cancel().await);
    }

    #[tokio::test]
    async fn test_email_notification() {
        let task = submitted();
        let channel = Recorder::new(true);
        task.bind_remote(routing(), channel.clone());

        task.add_email_notification().await.unwrap();
        assert!(task.email_requested());
        assert_eq!(
            channel.sent.lock().unwrap()[0],
            TaskControl::add_email_notification(TaskId::new("t-1"))
        );

        task.complete(TaskResult::success(TaskId::new("t-1"), json!(null)));
        assert!(matches!(
            task.add_email_notification().await,
            Err(EngineError::AlreadyFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_progress_offsets() {
        let task = submitted();
        task.begin_run();
        for i in 0..3 {
            task.append_progress(ProgressEntry::new(i * 10, format!("step {i}")));
        }

        assert_eq!(task.progress(0).len(), 3);
        assert_eq!(task.progress(2)[0].message, "step 2");
        assert!(task.progress(3).is_empty());
        assert!(task.progress(10).is_empty());
    }

    #[tokio::test]
    async fn test_remote_started_notification() {
        let task = submitted();
        task.on_started(task.task_id());
        assert_eq!(task.status(), TaskState::Running);
        task.on_progress(task.task_id(), ProgressEntry::new(50, "halfway"));
        assert_eq!(task.progress_len(), 1);
    }

    #[tokio::test]
    async fn test_outcome_without_start() {
        let task = submitted();
        task.complete(TaskResult::success(TaskId::new("t-1"), json!(1)).remote());
        assert_eq!(task.status(), TaskState::Finished);
        assert!(task.started_at().is_some());

        let lost = submitted();
        lost.complete(TaskResult::failure(
            TaskId::new("t-1"),
            TaskFailure::new(TaskFailure::REMOTE_LOST, "gone"),
        ));
        assert_eq!(lost.status(), TaskState::Failed);
    }

    #[tokio::test]
    async fn test_withdrawn_before_start_has_no_start_time() {
        let task = submitted();
        assert!(task.complete(TaskResult::cancelled(TaskId::new("t-1"), "withdrawn").remote()));
        assert_eq!(task.status(), TaskState::Cancelled);
        assert!(task.started_at().is_none());
        assert_eq!(task.wait().await, TaskState::Cancelled);
    }
}
