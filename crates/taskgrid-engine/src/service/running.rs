//! Submission façade.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use taskgrid_core::{TaskCommand, TaskFailure, TaskId, TaskResult};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executing::ExecutingTask;
use crate::mail::{CompletionNotice, LogMailer, Mailer};
use crate::registry::TaskRegistry;
use crate::remote::{DispatchError, RemoteDispatcher};
use crate::submitted::SubmittedTask;
use crate::sweeper::{self, SweepReport};
use crate::task::{Task, TaskCatalog};

/// Accepts jobs, runs them locally or hands them to remote workers, and
/// keeps them queryable until the sweeper evicts them.
///
/// Submission never waits for execution: every `submit_*` returns the task
/// id as soon as the job is registered.
pub struct TaskRunningService {
    config: EngineConfig,
    registry: Arc<TaskRegistry>,
    catalog: Arc<TaskCatalog>,
    pool: Arc<Semaphore>,
    dispatcher: Option<Arc<RemoteDispatcher>>,
    mailer: Arc<dyn Mailer>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRunningService {
    pub fn new(config: EngineConfig, catalog: TaskCatalog) -> Self {
        let pool = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            config,
            registry: Arc::new(TaskRegistry::new()),
            catalog: Arc::new(catalog),
            pool,
            dispatcher: None,
            mailer: Arc::new(LogMailer),
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<RemoteDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn dispatcher(&self) -> Option<&Arc<RemoteDispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Local pool permits currently free.
    pub fn available_slots(&self) -> usize {
        self.pool.available_permits()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start background maintenance: the registry sweeper and, when a hub
    /// is attached, its lease reaper.
    pub fn init(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.config.sweep_interval());
            // first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        service.sweep().await;
                    }
                }
            }
            debug!("Sweeper stopped");
        });

        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        background.push(sweeper);
        if let Some(dispatcher) = &self.dispatcher {
            background.push(tokio::spawn(
                Arc::clone(dispatcher.hub()).run_reaper(self.shutdown.child_token()),
            ));
        }
        info!(
            pool = self.config.max_concurrent_tasks,
            remote = self.dispatcher.is_some(),
            "Task running service initialized"
        );
    }

    /// Run one sweep of the registry now.
    pub async fn sweep(&self) -> SweepReport {
        sweeper::sweep(&self.registry, self.config.retention(), Utc::now()).await
    }

    /// Cancel every live task, wait a bounded time for them to settle and
    /// stop background work. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let active = self.registry.active().await;
        info!(count = active.len(), "Cancelling running tasks");
        for task in &active {
            task.cancel().await;
        }

        let settle = futures_util::future::join_all(active.iter().map(|t| t.wait()));
        if tokio::time::timeout(self.config.shutdown_grace(), settle)
            .await
            .is_err()
        {
            warn!("Some tasks did not stop within the shutdown grace period");
        }

        self.pool.close();
        let background: Vec<_> = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in background {
            handle.abort();
        }
        info!("Task running service stopped");
    }

    /// Submit a job run by the local pool; the task comes from the catalog.
    pub async fn submit_local(self: &Arc<Self>, command: TaskCommand) -> Result<TaskId, EngineError> {
        let task = self.catalog.resolve(&command)?;
        self.submit_local_task(command, task).await
    }

    /// Submit a job run by the local pool with an explicit task.
    pub async fn submit_local_task(
        self: &Arc<Self>,
        command: TaskCommand,
        task: Arc<dyn Task>,
    ) -> Result<TaskId, EngineError> {
        let submitted = self.register(command, task.exclusive_per_user()).await?;
        let task_id = submitted.task_id().clone();

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_local(&submitted, task).await;
            service.finalize(&submitted);
        });
        Ok(task_id)
    }

    /// Submit a job to the remote workers.
    ///
    /// Without a worker able to take the type, the job runs locally unless
    /// the command is remote-only, in which case the submission fails.
    pub async fn submit_remote(self: &Arc<Self>, command: TaskCommand) -> Result<TaskId, EngineError> {
        let Some(dispatcher) = self.dispatcher.clone() else {
            return self.fallback_local(command, "no dispatch hub configured").await;
        };
        if !dispatcher.is_available(&command.task_type).await {
            return self
                .fallback_local(command, "no connected worker accepts this task type")
                .await;
        }

        let exclusive = self.catalog.exclusive_per_user(&command.task_type);
        let submitted = self.register(command, exclusive).await?;
        let task_id = submitted.task_id().clone();

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_remote(&submitted, &dispatcher).await;
            service.finalize(&submitted);
        });
        Ok(task_id)
    }

    pub async fn get_submitted_task(&self, task_id: &TaskId) -> Option<Arc<SubmittedTask>> {
        self.registry.get(task_id).await
    }

    pub async fn list_submitted_tasks(&self) -> Vec<Arc<SubmittedTask>> {
        self.registry.snapshot().await
    }

    async fn fallback_local(
        self: &Arc<Self>,
        command: TaskCommand,
        reason: &str,
    ) -> Result<TaskId, EngineError> {
        if command.remote_only {
            warn!(task_type = %command.task_type, reason, "Remote-only task cannot be dispatched");
            return Err(EngineError::RemoteUnavailable(format!(
                "{}: {reason}",
                command.task_type
            )));
        }
        info!(task_type = %command.task_type, reason, "Running task locally instead");
        self.submit_local(command).await
    }

    async fn register(
        &self,
        mut command: TaskCommand,
        exclusive: bool,
    ) -> Result<Arc<SubmittedTask>, EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        command.ensure_task_id();
        command.submission_time = Some(Utc::now());
        command.start_time = None;

        let submitted = SubmittedTask::new(command, exclusive);
        self.registry.insert(Arc::clone(&submitted)).await?;
        info!(
            task_id = %submitted.task_id(),
            task_type = %submitted.signature().task_type,
            submitter = %submitted.submitter().principal,
            "Task submitted"
        );
        Ok(submitted)
    }

    /// Wait for a pool permit, then execute. Leaves the task terminal.
    async fn run_local(&self, submitted: &Arc<SubmittedTask>, task: Arc<dyn Task>) {
        let cancel = submitted.cancellation_token();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(task_id = %submitted.task_id(), "Task withdrawn while queued");
                return;
            }
            permit = Arc::clone(&self.pool).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    submitted.complete(TaskResult::cancelled(
                        submitted.task_id().clone(),
                        "Task service shut down before the task started",
                    ));
                    return;
                }
            },
        };

        if !submitted.begin_run() {
            return;
        }

        let sink = Arc::clone(submitted);
        let lifecycle = Arc::clone(submitted);
        let result = ExecutingTask::new(task, submitted.command())
            .with_progress_sink(sink)
            .with_lifecycle(lifecycle)
            .call(cancel)
            .await;
        drop(permit);
        submitted.complete(result);
    }

    /// Hand the task to a worker. Leaves the task terminal.
    async fn run_remote(&self, submitted: &Arc<SubmittedTask>, dispatcher: &RemoteDispatcher) {
        let cancel = submitted.cancellation_token();
        let outcome = tokio::select! {
            outcome = dispatcher.invoke(submitted) => outcome,
            // fires only for jobs cancelled before the worker started them
            _ = cancel.cancelled() => {
                debug!(task_id = %submitted.task_id(), "Remote task withdrawn before it started");
                return;
            }
        };

        let task_id = submitted.task_id().clone();
        match outcome {
            Ok(result) => {
                submitted.complete(result);
            }
            Err(DispatchError::Unavailable(reason)) => {
                if submitted.command().remote_only {
                    submitted.complete(TaskResult::failure(
                        task_id,
                        TaskFailure::new(TaskFailure::REMOTE_UNAVAILABLE, reason),
                    ));
                    return;
                }
                info!(task_id = %task_id, "Worker vanished before hand-off; running locally");
                match self.catalog.resolve(&submitted.command()) {
                    Ok(task) => self.run_local(submitted, task).await,
                    Err(e) => {
                        submitted.complete(TaskResult::failure(
                            task_id,
                            TaskFailure::new(TaskFailure::UNKNOWN_TASK_TYPE, e.to_string()),
                        ));
                    }
                }
            }
            Err(e @ DispatchError::Lost(_)) => {
                warn!(task_id = %task_id, error = %e, "Remote task lost");
                submitted.complete(TaskResult::failure(
                    task_id,
                    TaskFailure::new(TaskFailure::REMOTE_LOST, e.to_string()),
                ));
            }
            Err(e @ DispatchError::LeaseExpired(_)) => {
                warn!(task_id = %task_id, error = %e, "Remote task lease expired");
                submitted.complete(TaskResult::failure(
                    task_id,
                    TaskFailure::new(TaskFailure::LEASE_EXPIRED, e.to_string()),
                ));
            }
        }
    }

    /// Post-completion bookkeeping: the completion notice.
    fn finalize(&self, submitted: &SubmittedTask) {
        if !submitted.is_terminal() || !submitted.email_requested() {
            return;
        }
        let sent = CompletionNotice::for_task(submitted).and_then(|notice| self.mailer.send(&notice));
        if let Err(e) = sent {
            error!(task_id = %submitted.task_id(), error = %e, "Failed to send completion notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::mail::tests::RecordingMailer;
    use crate::remote::{DispatchHub, FakeWorker};
    use crate::security;
    use crate::task::{TaskContext, TaskError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use taskgrid_core::{ProgressEntry, SecurityContext, TaskState};
    use taskgrid_proto::WorkerMessage;
    use tokio::sync::Notify;

    struct Answer;

    #[async_trait]
    impl Task for Answer {
        async fn execute(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskError> {
            ctx.progress().report(50, "halfway");
            ctx.progress().report(100, "done");
            Ok(json!(42))
        }
    }

    struct Boom;

    #[async_trait]
    impl Task for Boom {
        async fn execute(&self, _ctx: TaskContext) -> Result<serde_json::Value, TaskError> {
            Err(TaskError::failed("boom"))
        }
    }

    /// Blocks until released or cancelled.
    struct Gate {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Task for Gate {
        async fn execute(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskError> {
            tokio::select! {
                _ = self.release.notified() => Ok(json!("released")),
                _ = ctx.cancelled() => Err(TaskError::Cancelled),
            }
        }
    }

    /// Records the identity visible while running.
    struct WhoAmI;

    #[async_trait]
    impl Task for WhoAmI {
        async fn execute(&self, _ctx: TaskContext) -> Result<serde_json::Value, TaskError> {
            Ok(json!(security::current().map(|c| c.principal)))
        }
    }

    fn service(pool: usize) -> Arc<TaskRunningService> {
        let config = EngineConfig {
            max_concurrent_tasks: pool,
            ..EngineConfig::default()
        };
        Arc::new(TaskRunningService::new(config, TaskCatalog::builtin()))
    }

    fn command(task_type: &str) -> TaskCommand {
        TaskCommand::new(task_type, SecurityContext::new("alice"))
    }

    async fn wait_for(service: &TaskRunningService, task_id: &TaskId) -> Arc<SubmittedTask> {
        let task = service.get_submitted_task(task_id).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task.wait())
            .await
            .expect("task did not finish");
        task
    }

    #[tokio::test]
    async fn test_local_happy_path() {
        let service = service(2);
        let task_id = service
            .submit_local_task(command("answer"), Arc::new(Answer))
            .await
            .unwrap();

        let task = wait_for(&service, &task_id).await;
        assert_eq!(task.status(), TaskState::Finished);
        assert_eq!(task.result().unwrap().answer, Some(json!(42)));
        let progress: Vec<(u8, String)> = task
            .progress(0)
            .into_iter()
            .map(|e| (e.percent, e.message))
            .collect();
        assert_eq!(
            progress,
            vec![(50, "halfway".to_string()), (100, "done".to_string())]
        );
        assert!(!task.result().unwrap().ran_remotely);
    }

    #[tokio::test]
    async fn test_local_failure() {
        let service = service(2);
        let task_id = service
            .submit_local_task(command("boom"), Arc::new(Boom))
            .await
            .unwrap();

        let task = wait_for(&service, &task_id).await;
        assert_eq!(task.status(), TaskState::Failed);
        assert_eq!(task.result().unwrap().error_message(), Some("boom"));
    }

    #[tokio::test]
    async fn test_cancel_while_queued() {
        let service = service(1);
        let release = Arc::new(Notify::new());

        let blocker = service
            .submit_local_task(
                command("gate").with_target("a"),
                Arc::new(Gate {
                    release: release.clone(),
                }),
            )
            .await
            .unwrap();
        let queued = service
            .submit_local_task(command("gate").with_target("b"), Arc::new(Answer))
            .await
            .unwrap();

        let queued_task = service.get_submitted_task(&queued).await.unwrap();
        assert_eq!(queued_task.status(), TaskState::Queued);
        assert!(queued_task.cancel().await);
        assert_eq!(queued_task.status(), TaskState::Cancelled);

        release.notify_one();
        let blocker_task = wait_for(&service, &blocker).await;
        assert_eq!(blocker_task.status(), TaskState::Finished);

        // the cancelled task never ran
        assert!(queued_task.started_at().is_none());
        assert!(queued_task.progress(0).is_empty());
        assert_eq!(service.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let service = service(1);
        let task_id = service
            .submit_local_task(
                command("gate"),
                Arc::new(Gate {
                    release: Arc::new(Notify::new()),
                }),
            )
            .await
            .unwrap();
        let task = service.get_submitted_task(&task_id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while task.status() != TaskState::Running {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(task.cancel().await);
        assert_eq!(wait_for(&service, &task_id).await.status(), TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_conflicting_submission() {
        let service = service(1);
        let release = Arc::new(Notify::new());
        let first = service
            .submit_local_task(
                command("gate").with_target("study"),
                Arc::new(Gate {
                    release: release.clone(),
                }),
            )
            .await
            .unwrap();

        let err = service
            .submit_local_task(command("gate").with_target("study"), Arc::new(Answer))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ConflictingTask { existing, .. } if existing == first));

        release.notify_one();
        wait_for(&service, &first).await;
        service
            .submit_local_task(command("gate").with_target("study"), Arc::new(Answer))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_task_id() {
        let service = service(1);
        let id = TaskId::new("fixed");
        service
            .submit_local(command("monitor").with_id(id.clone()))
            .await
            .unwrap();

        let err = service
            .submit_local(command("monitor").with_id(id.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTaskId(dup) if dup == id));
    }

    #[tokio::test]
    async fn test_identity_scoped_to_task() {
        let service = service(1);
        let first = service
            .submit_local_task(
                TaskCommand::new("who", SecurityContext::new("alice")),
                Arc::new(WhoAmI),
            )
            .await
            .unwrap();
        let second = service
            .submit_local_task(
                TaskCommand::new("who", SecurityContext::new("bob")),
                Arc::new(WhoAmI),
            )
            .await
            .unwrap();

        let first = wait_for(&service, &first).await.result().unwrap();
        let second = wait_for(&service, &second).await.result().unwrap();
        assert_eq!(first.answer, Some(json!("alice")));
        assert_eq!(second.answer, Some(json!("bob")));
        assert!(security::current().is_none());
    }

    #[tokio::test]
    async fn test_unknown_task_type() {
        let service = service(1);
        let err = service.submit_local(command("nope")).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTaskType(_)));
    }

    #[tokio::test]
    async fn test_remote_fallback_without_hub() {
        let service = service(1);
        let task_id = service.submit_remote(command("monitor")).await.unwrap();

        let task = wait_for(&service, &task_id).await;
        assert_eq!(task.status(), TaskState::Finished);
        assert!(!task.result().unwrap().ran_remotely);
    }

    #[tokio::test]
    async fn test_remote_only_without_worker() {
        let hub = DispatchHub::new(HubConfig::default());
        let service = Arc::new(
            TaskRunningService::new(EngineConfig::default(), TaskCatalog::builtin())
                .with_dispatcher(Arc::new(RemoteDispatcher::new(hub))),
        );

        let err = service
            .submit_remote(command("monitor").remote_only())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RemoteUnavailable(_)));
        assert!(service.list_submitted_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_remote_happy_path() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;
        let service = Arc::new(
            TaskRunningService::new(EngineConfig::default(), TaskCatalog::builtin())
                .with_dispatcher(Arc::new(RemoteDispatcher::new(hub.clone()))),
        );

        let task_id = service.submit_remote(command("monitor")).await.unwrap();
        let assigned = worker.expect_assign().await;
        assert_eq!(assigned.task_id.as_ref(), Some(&task_id));
        assert_eq!(assigned.security_context.principal, "alice");

        worker.send(WorkerMessage::started(task_id.clone())).await;
        worker
            .send(WorkerMessage::Progress {
                task_id: task_id.clone(),
                entry: ProgressEntry::new(50, "halfway"),
            })
            .await;
        worker
            .send(WorkerMessage::Completed {
                result: TaskResult::success(task_id.clone(), json!(42)),
            })
            .await;

        let task = wait_for(&service, &task_id).await;
        assert_eq!(task.status(), TaskState::Finished);
        let result = task.result().unwrap();
        assert!(result.ran_remotely);
        assert_eq!(result.answer, Some(json!(42)));
        assert_eq!(task.progress(0)[0].message, "halfway");
        assert!(hub.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_worker_disconnect_fails_task() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;
        let service = Arc::new(
            TaskRunningService::new(EngineConfig::default(), TaskCatalog::builtin())
                .with_dispatcher(Arc::new(RemoteDispatcher::new(hub.clone()))),
        );

        let task_id = service.submit_remote(command("monitor")).await.unwrap();
        worker.expect_assign().await;
        worker.send(WorkerMessage::started(task_id.clone())).await;
        drop(worker);

        let task = wait_for(&service, &task_id).await;
        assert_eq!(task.status(), TaskState::Failed);
        assert_eq!(
            task.result().unwrap().failure.unwrap().kind,
            TaskFailure::REMOTE_LOST
        );
        assert!(hub.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_completion_notice_sent() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = Arc::new(
            TaskRunningService::new(EngineConfig::default(), TaskCatalog::builtin())
                .with_mailer(mailer.clone()),
        );
        let mut cmd = TaskCommand::new(
            "monitor",
            SecurityContext::new("alice").with_email("alice@example.org"),
        );
        cmd.email_alert = true;

        let task_id = service.submit_local(cmd).await.unwrap();
        wait_for(&service, &task_id).await;

        // the notice is sent right after the task turns terminal
        tokio::time::timeout(Duration::from_secs(5), async {
            while mailer.sent.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent[0].task_id, task_id);
        assert_eq!(sent[0].state, TaskState::Finished);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_rejects() {
        let service = service(1);
        let running = service
            .submit_local_task(
                command("gate").with_target("a"),
                Arc::new(Gate {
                    release: Arc::new(Notify::new()),
                }),
            )
            .await
            .unwrap();
        let queued = service
            .submit_local_task(command("gate").with_target("b"), Arc::new(Answer))
            .await
            .unwrap();
        let gate = service.get_submitted_task(&running).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while gate.status() != TaskState::Running {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        service.shutdown().await;

        for id in [&running, &queued] {
            let task = service.get_submitted_task(id).await.unwrap();
            assert_eq!(task.status(), TaskState::Cancelled);
        }
        assert!(matches!(
            service.submit_local(command("monitor")).await,
            Err(EngineError::ShuttingDown)
        ));
    }
}
