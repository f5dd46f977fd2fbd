//! Worker-facing dispatch hub.
//!
//! Workers connect over TCP, register with a `Hello`, report load through
//! heartbeats and stream back start, progress and completion messages for
//! the commands assigned to them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use taskgrid_core::{
    Routing, TaskCommand, TaskControl, TaskId, TaskResult, WorkerId, WorkerInfo, WorkerStatus,
};
use taskgrid_proto::{decode, encode, framed, HubMessage, WorkerMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ControlChannel, DispatchError, SubscriptionTable};
use crate::config::HubConfig;

/// A worker currently registered with the hub.
#[derive(Debug, Clone)]
pub struct ConnectedWorker {
    pub info: WorkerInfo,
    pub status: WorkerStatus,
    pub active_tasks: u32,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    connection: u64,
    tx: mpsc::Sender<HubMessage>,
}

impl ConnectedWorker {
    fn can_take(&self, task_type: &str) -> bool {
        self.status.can_accept_tasks() && self.info.supports(task_type)
    }
}

struct PendingDispatch {
    worker_id: WorkerId,
    connection: u64,
    reply: oneshot::Sender<TaskResult>,
}

/// Coordination point between the engine and its workers.
pub struct DispatchHub {
    config: HubConfig,
    workers: RwLock<HashMap<WorkerId, ConnectedWorker>>,
    pending: Mutex<HashMap<TaskId, PendingDispatch>>,
    subscriptions: Arc<SubscriptionTable>,
    next_connection: AtomicU64,
}

impl DispatchHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            workers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            subscriptions: SubscriptionTable::new(),
            next_connection: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionTable> {
        &self.subscriptions
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<TaskId, PendingDispatch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept worker connections until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Dispatch hub listening");
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Worker connection accepted");
                        tokio::spawn(Arc::clone(&self).serve_connection(stream));
                    }
                    Err(e) => error!(error = %e, "Failed to accept worker connection"),
                },
            }
        }
        info!("Dispatch hub stopped accepting workers");
    }

    /// Drive one worker connection until it closes.
    pub async fn serve_connection<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (mut sink, mut inbound) = framed(stream).split();
        let (tx, rx) = mpsc::channel::<HubMessage>(self.config.outbound_buffer.max(1));

        let writer = tokio::spawn(async move {
            let mut outbound = ReceiverStream::new(rx);
            while let Some(msg) = outbound.next().await {
                let line = match encode(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(error = %e, "Failed to encode hub message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(line).await {
                    warn!(error = %e, "Failed to write to worker");
                    break;
                }
            }
        });

        let mut registered: Option<WorkerId> = None;

        while let Some(frame) = inbound.next().await {
            let line = match frame {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Worker stream error");
                    break;
                }
            };
            let msg: WorkerMessage = match decode(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "Discarding malformed worker message");
                    continue;
                }
            };

            match msg {
                WorkerMessage::Hello { info } => {
                    let worker_id = info.worker_id.clone();
                    self.register(info, connection, tx.clone()).await;
                    if tx
                        .send(HubMessage::Welcome {
                            worker_id: worker_id.clone(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    registered = Some(worker_id);
                }
                WorkerMessage::Goodbye { worker_id } => {
                    info!(worker_id = %worker_id, "Worker said goodbye");
                    break;
                }
                other if registered.is_none() => {
                    warn!(message = ?other, "Ignoring message from unregistered worker");
                }
                other => self.handle_worker_message(other).await,
            }
        }

        if let Some(worker_id) = registered {
            self.disconnect(&worker_id, connection).await;
        }
        writer.abort();
    }

    async fn register(&self, info: WorkerInfo, connection: u64, tx: mpsc::Sender<HubMessage>) {
        let now = Utc::now();
        let worker_id = info.worker_id.clone();
        info!(
            worker_id = %worker_id,
            hostname = %info.hostname,
            version = %info.version,
            task_types = ?info.task_types,
            max_concurrent = info.max_concurrent,
            "Worker connected"
        );
        let previous = self.workers.write().await.insert(
            worker_id.clone(),
            ConnectedWorker {
                info,
                status: WorkerStatus::Idle,
                active_tasks: 0,
                connected_at: now,
                last_heartbeat: now,
                connection,
                tx,
            },
        );
        if let Some(previous) = previous.filter(|p| p.connection != connection) {
            let lost = self.fail_pending_for(previous.connection);
            warn!(worker_id = %worker_id, lost_tasks = lost, "Worker re-registered; replacing previous connection");
        }
    }

    async fn handle_worker_message(&self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Heartbeat {
                worker_id,
                status,
                active_tasks,
                ..
            } => {
                let mut workers = self.workers.write().await;
                if let Some(worker) = workers.get_mut(&worker_id) {
                    worker.status = status;
                    worker.active_tasks = active_tasks;
                    worker.last_heartbeat = Utc::now();
                    debug!(worker_id = %worker_id, status = ?status, active_tasks, "Heartbeat");
                } else {
                    warn!(worker_id = %worker_id, "Heartbeat from unknown worker");
                }
            }
            WorkerMessage::Started { task_id, .. } => {
                let notified = self.subscriptions.notify_started(&task_id);
                debug!(task_id = %task_id, notified, "Remote task started");
            }
            WorkerMessage::Progress { task_id, entry } => {
                self.subscriptions.notify_progress(&task_id, entry);
            }
            WorkerMessage::Completed { result } => self.complete(result).await,
            WorkerMessage::Hello { .. } | WorkerMessage::Goodbye { .. } => {}
        }
    }

    async fn complete(&self, result: TaskResult) {
        let pending = self.pending().remove(&result.task_id);
        let Some(pending) = pending else {
            warn!(task_id = %result.task_id, "Outcome for a task nobody is waiting for");
            return;
        };

        self.release_slot(&pending).await;
        info!(
            task_id = %result.task_id,
            worker_id = %pending.worker_id,
            success = result.is_success(),
            "Remote task completed"
        );
        if pending.reply.send(result).is_err() {
            debug!("Dispatcher stopped waiting before the outcome arrived");
        }
    }

    /// Remove a worker and fail every hand-off still waiting on the
    /// connection. A connection already replaced by a newer one leaves the
    /// worker entry alone.
    async fn disconnect(&self, worker_id: &WorkerId, connection: u64) {
        let removed = {
            let mut workers = self.workers.write().await;
            let current = workers
                .get(worker_id)
                .is_some_and(|w| w.connection == connection);
            current && workers.remove(worker_id).is_some()
        };

        let lost = self.fail_pending_for(connection);
        if removed {
            warn!(worker_id = %worker_id, lost_tasks = lost, "Worker disconnected");
        } else if lost > 0 {
            warn!(worker_id = %worker_id, lost_tasks = lost, "Replaced connection closed");
        }
    }

    fn fail_pending_for(&self, connection: u64) -> usize {
        let mut pending = self.pending();
        let lost: Vec<TaskId> = pending
            .iter()
            .filter(|(_, p)| p.connection == connection)
            .map(|(task_id, _)| task_id.clone())
            .collect();
        // dropping the reply senders wakes the waiting dispatchers
        for task_id in &lost {
            pending.remove(task_id);
        }
        lost.len()
    }

    /// Whether some connected worker accepts `task_type`.
    pub async fn is_available(&self, task_type: &str) -> bool {
        self.workers
            .read()
            .await
            .values()
            .any(|w| w.can_take(task_type))
    }

    pub async fn is_connected(&self, worker_id: &WorkerId) -> bool {
        self.workers.read().await.contains_key(worker_id)
    }

    /// Snapshot of connected workers.
    pub async fn workers(&self) -> Vec<ConnectedWorker> {
        let mut workers: Vec<_> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.info.worker_id.cmp(&b.info.worker_id));
        workers
    }

    /// Hand `command` to the least loaded capable worker.
    ///
    /// The command is stamped with its routing before it leaves. The
    /// receiver resolves with the worker's outcome, or errors if the worker
    /// goes away first.
    pub async fn dispatch(
        &self,
        mut command: TaskCommand,
    ) -> Result<(Routing, oneshot::Receiver<TaskResult>), DispatchError> {
        let task_id = command.ensure_task_id();

        let (worker_id, connection, tx) = {
            let mut workers = self.workers.write().await;
            let worker = workers
                .values_mut()
                .filter(|w| w.can_take(&command.task_type))
                .min_by_key(|w| w.active_tasks)
                .ok_or_else(|| DispatchError::Unavailable(command.task_type.clone()))?;
            worker.active_tasks += 1;
            (
                worker.info.worker_id.clone(),
                worker.connection,
                worker.tx.clone(),
            )
        };

        let routing = Routing {
            task_type: command.task_type.clone(),
            worker_id: worker_id.clone(),
        };
        command.routing = Some(routing.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending().insert(
            task_id.clone(),
            PendingDispatch {
                worker_id: worker_id.clone(),
                connection,
                reply: reply_tx,
            },
        );

        if tx.send(HubMessage::Assign { command }).await.is_err() {
            let pending = self.pending().remove(&task_id);
            if let Some(pending) = pending {
                self.release_slot(&pending).await;
            }
            warn!(task_id = %task_id, worker_id = %worker_id, "Worker went away during dispatch");
            return Err(DispatchError::Unavailable(routing.task_type));
        }

        info!(task_id = %task_id, worker_id = %worker_id, task_type = %routing.task_type, "Dispatched task");
        Ok((routing, reply_rx))
    }

    /// Stop waiting for a task's outcome.
    ///
    /// Releases the worker's slot when the worker table is free; otherwise
    /// the next heartbeat corrects the count.
    pub fn forget(&self, task_id: &TaskId) -> bool {
        let Some(pending) = self.pending().remove(task_id) else {
            return false;
        };
        if let Ok(mut workers) = self.workers.try_write() {
            release(&mut workers, &pending);
        }
        true
    }

    /// Give up on a hand-off: release the worker's slot and ask the worker
    /// to cancel the job. Returns false if nothing was pending.
    pub async fn abandon(&self, task_id: &TaskId) -> bool {
        let pending = self.pending().remove(task_id);
        let Some(pending) = pending else {
            return false;
        };
        self.release_slot(&pending).await;
        let delivered = self
            .send_control(&pending.worker_id, TaskControl::cancel(task_id.clone()))
            .await;
        warn!(task_id = %task_id, worker_id = %pending.worker_id, delivered, "Abandoned remote task");
        true
    }

    async fn release_slot(&self, pending: &PendingDispatch) {
        release(&mut *self.workers.write().await, pending);
    }

    /// Hand-offs awaiting an outcome.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Drop expired leases and workers whose heartbeat is stale.
    pub async fn reap(&self, now: Instant, wall_clock: DateTime<Utc>) -> (usize, usize) {
        let expired = self.subscriptions.expire(now);

        let cutoff = wall_clock - self.config.heartbeat_timeout();
        let stale: Vec<(WorkerId, u64)> = self
            .workers
            .read()
            .await
            .values()
            .filter(|w| w.last_heartbeat < cutoff)
            .map(|w| (w.info.worker_id.clone(), w.connection))
            .collect();
        for (worker_id, connection) in &stale {
            warn!(worker_id = %worker_id, "Worker heartbeat timed out");
            self.disconnect(worker_id, *connection).await;
        }

        (expired, stale.len())
    }

    /// Periodically reap until `shutdown` fires.
    pub async fn run_reaper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.reap_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.reap(Instant::now(), Utc::now()).await;
                }
            }
        }
    }
}

/// Decrement the load of the connection that took the hand-off.
fn release(workers: &mut HashMap<WorkerId, ConnectedWorker>, pending: &PendingDispatch) {
    if let Some(worker) = workers
        .get_mut(&pending.worker_id)
        .filter(|w| w.connection == pending.connection)
    {
        worker.active_tasks = worker.active_tasks.saturating_sub(1);
    }
}

#[async_trait]
impl ControlChannel for DispatchHub {
    async fn send_control(&self, worker_id: &WorkerId, control: TaskControl) -> bool {
        let tx = match self.workers.read().await.get(worker_id) {
            Some(worker) => worker.tx.clone(),
            None => return false,
        };
        debug!(task_id = %control.task_id, worker_id = %worker_id, request = ?control.request, "Sending control");
        tx.send(HubMessage::Control { control }).await.is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::remote::{JobObserver, NotificationKind};
    use serde_json::json;
    use std::time::Duration;
    use taskgrid_core::{ProgressEntry, SecurityContext};
    use taskgrid_proto::MessageFrames;
    use tokio::io::DuplexStream;

    /// Scripted worker on the far side of an in-memory connection.
    pub(crate) struct FakeWorker {
        frames: MessageFrames<DuplexStream>,
        pub(crate) worker_id: WorkerId,
    }

    impl FakeWorker {
        pub(crate) async fn connect(hub: &Arc<DispatchHub>, task_types: &[&str]) -> Self {
            Self::connect_as(hub, WorkerId::generate(), task_types).await
        }

        pub(crate) async fn connect_as(
            hub: &Arc<DispatchHub>,
            worker_id: WorkerId,
            task_types: &[&str],
        ) -> Self {
            let (hub_side, worker_side) = tokio::io::duplex(64 * 1024);
            tokio::spawn(Arc::clone(hub).serve_connection(hub_side));

            let mut info = WorkerInfo::new(worker_id.clone(), "test-host");
            for task_type in task_types {
                info = info.with_task_type(*task_type);
            }

            let mut worker = Self {
                frames: framed(worker_side),
                worker_id,
            };
            worker.send(WorkerMessage::Hello { info }).await;
            match worker.recv().await {
                HubMessage::Welcome { worker_id } => assert_eq!(worker_id, worker.worker_id),
                other => panic!("expected welcome, got {other:?}"),
            }
            worker
        }

        pub(crate) async fn send(&mut self, msg: WorkerMessage) {
            self.frames.send(encode(&msg).unwrap()).await.unwrap();
        }

        pub(crate) async fn recv(&mut self) -> HubMessage {
            let line = tokio::time::timeout(Duration::from_secs(5), self.frames.next())
                .await
                .expect("timed out waiting for hub message")
                .expect("connection closed")
                .unwrap();
            decode(&line).unwrap()
        }

        pub(crate) async fn expect_assign(&mut self) -> TaskCommand {
            match self.recv().await {
                HubMessage::Assign { command } => command,
                other => panic!("expected assign, got {other:?}"),
            }
        }
    }

    fn command(id: &str) -> TaskCommand {
        TaskCommand::new("monitor", SecurityContext::new("alice")).with_id(TaskId::new(id))
    }

    #[tokio::test]
    async fn test_registration_and_availability() {
        let hub = DispatchHub::new(HubConfig::default());
        assert!(!hub.is_available("monitor").await);

        let worker = FakeWorker::connect(&hub, &["monitor"]).await;

        assert!(hub.is_available("monitor").await);
        assert!(!hub.is_available("report").await);
        assert!(hub.is_connected(&worker.worker_id).await);
        assert_eq!(hub.workers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_and_complete() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;

        let (routing, reply) = hub.dispatch(command("t-1")).await.unwrap();
        assert_eq!(routing.worker_id, worker.worker_id);

        let assigned = worker.expect_assign().await;
        assert_eq!(assigned.task_id, Some(TaskId::new("t-1")));
        assert_eq!(assigned.routing, Some(routing));

        worker
            .send(WorkerMessage::Completed {
                result: TaskResult::success(TaskId::new("t-1"), json!(42)).remote(),
            })
            .await;

        let result = reply.await.unwrap();
        assert_eq!(result.answer, Some(json!(42)));
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_without_worker() {
        let hub = DispatchHub::new(HubConfig::default());
        let err = hub.dispatch(command("t-1")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable(t) if t == "monitor"));
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;

        let (_, reply) = hub.dispatch(command("t-1")).await.unwrap();
        worker.expect_assign().await;
        drop(worker);

        assert!(reply.await.is_err());
        assert!(hub.workers().await.is_empty());
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_fails_pending_of_replaced_connection() {
        let hub = DispatchHub::new(HubConfig::default());
        let id = WorkerId::new("w-same");
        let mut old = FakeWorker::connect_as(&hub, id.clone(), &["monitor"]).await;
        let (_, reply) = hub.dispatch(command("t-1")).await.unwrap();
        old.expect_assign().await;

        let mut new = FakeWorker::connect_as(&hub, id.clone(), &["monitor"]).await;
        drop(old);

        let outcome = tokio::time::timeout(Duration::from_secs(5), reply)
            .await
            .expect("hand-off left waiting");
        assert!(outcome.is_err());
        assert_eq!(hub.pending_count(), 0);

        // the replacement connection keeps serving
        assert!(hub.is_connected(&id).await);
        assert_eq!(hub.workers().await[0].active_tasks, 0);
        let (routing, _reply) = hub.dispatch(command("t-2")).await.unwrap();
        assert_eq!(routing.worker_id, id);
        assert_eq!(new.expect_assign().await.task_id, Some(TaskId::new("t-2")));
    }

    #[tokio::test]
    async fn test_abandon_cancels_and_frees_slot() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;
        let (_, reply) = hub.dispatch(command("t-1")).await.unwrap();
        worker.expect_assign().await;
        assert_eq!(hub.workers().await[0].active_tasks, 1);

        assert!(hub.abandon(&TaskId::new("t-1")).await);
        assert!(reply.await.is_err());
        assert_eq!(hub.workers().await[0].active_tasks, 0);
        match worker.recv().await {
            HubMessage::Control { control } => {
                assert_eq!(control, TaskControl::cancel(TaskId::new("t-1")))
            }
            other => panic!("expected control, got {other:?}"),
        }

        assert!(!hub.abandon(&TaskId::new("t-1")).await);
    }

    #[tokio::test]
    async fn test_forget_frees_slot() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;
        let (_, _reply) = hub.dispatch(command("t-1")).await.unwrap();
        worker.expect_assign().await;

        assert!(hub.forget(&TaskId::new("t-1")));
        assert_eq!(hub.workers().await[0].active_tasks, 0);
        assert!(!hub.forget(&TaskId::new("t-1")));
    }

    #[tokio::test]
    async fn test_control_reaches_worker() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;

        let control = TaskControl::cancel(TaskId::new("t-1"));
        assert!(hub.send_control(&worker.worker_id, control.clone()).await);
        match worker.recv().await {
            HubMessage::Control { control: got } => assert_eq!(got, control),
            other => panic!("expected control, got {other:?}"),
        }

        assert!(!hub.send_control(&WorkerId::new("ghost"), control).await);
    }

    #[derive(Default)]
    struct Seen {
        events: Mutex<Vec<String>>,
    }

    impl JobObserver for Seen {
        fn on_started(&self, _task_id: &TaskId) {
            self.events.lock().unwrap().push("started".to_string());
        }

        fn on_progress(&self, _task_id: &TaskId, entry: ProgressEntry) {
            self.events.lock().unwrap().push(entry.message);
        }
    }

    #[tokio::test]
    async fn test_notifications_reach_subscribers_in_order() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;
        let seen = Arc::new(Seen::default());
        let lease = Duration::from_secs(60);
        let _started = hub.subscriptions().subscribe(
            TaskId::new("t-1"),
            NotificationKind::Started,
            seen.clone(),
            lease,
        );
        let _progress = hub.subscriptions().subscribe(
            TaskId::new("t-1"),
            NotificationKind::Progress,
            seen.clone(),
            lease,
        );

        let (_, reply) = hub.dispatch(command("t-1")).await.unwrap();
        worker.expect_assign().await;
        worker.send(WorkerMessage::started(TaskId::new("t-1"))).await;
        worker
            .send(WorkerMessage::Progress {
                task_id: TaskId::new("t-1"),
                entry: ProgressEntry::new(50, "halfway"),
            })
            .await;
        worker
            .send(WorkerMessage::Completed {
                result: TaskResult::success(TaskId::new("t-1"), json!(1)),
            })
            .await;
        reply.await.unwrap();

        assert_eq!(*seen.events.lock().unwrap(), vec!["started", "halfway"]);
    }

    #[tokio::test]
    async fn test_reap_drops_stale_workers() {
        let hub = DispatchHub::new(HubConfig::default());
        let worker = FakeWorker::connect(&hub, &["monitor"]).await;

        let (expired, stale) = hub.reap(Instant::now(), Utc::now()).await;
        assert_eq!((expired, stale), (0, 0));

        let later = Utc::now() + chrono::Duration::minutes(5);
        let (_, stale) = hub.reap(Instant::now(), later).await;
        assert_eq!(stale, 1);
        assert!(!hub.is_connected(&worker.worker_id).await);
    }

    #[tokio::test]
    async fn test_goodbye_deregisters() {
        let hub = DispatchHub::new(HubConfig::default());
        let mut worker = FakeWorker::connect(&hub, &["monitor"]).await;
        let (_, reply) = hub.dispatch(command("t-1")).await.unwrap();
        worker.expect_assign().await;

        worker
            .send(WorkerMessage::Goodbye {
                worker_id: worker.worker_id.clone(),
            })
            .await;

        assert!(reply.await.is_err());
        assert!(!hub.is_connected(&worker.worker_id).await);
    }
}
