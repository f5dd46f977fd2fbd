//! Hand-off of a submitted job to the hub.

use std::sync::Arc;
use std::time::Duration;

use taskgrid_core::{TaskId, TaskResult};
use tracing::{debug, info};

use super::{DispatchError, DispatchHub, JobObserver, NotificationKind, Subscription};
use crate::submitted::SubmittedTask;

/// Forwards jobs to remote workers and waits for their outcome.
pub struct RemoteDispatcher {
    hub: Arc<DispatchHub>,
    lease: Duration,
}

/// Everything a hand-off registered. Released on drop, whatever the outcome.
struct HandOff {
    hub: Arc<DispatchHub>,
    task_id: TaskId,
    _started: Subscription,
    _progress: Subscription,
}

impl Drop for HandOff {
    fn drop(&mut self) {
        if self.hub.forget(&self.task_id) {
            debug!(task_id = %self.task_id, "Abandoned remote hand-off");
        }
    }
}

impl RemoteDispatcher {
    pub fn new(hub: Arc<DispatchHub>) -> Self {
        let lease = hub.config().subscription_lease();
        Self { hub, lease }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn hub(&self) -> &Arc<DispatchHub> {
        &self.hub
    }

    pub async fn is_available(&self, task_type: &str) -> bool {
        self.hub.is_available(task_type).await
    }

    /// Run `task` remotely and return the worker's outcome.
    ///
    /// Start and progress subscriptions are registered before the command
    /// leaves so no notification can be missed; they are released when this
    /// returns or is dropped.
    pub async fn invoke(&self, task: &Arc<SubmittedTask>) -> Result<TaskResult, DispatchError> {
        let task_id = task.task_id().clone();
        let observer: Arc<dyn JobObserver> = Arc::clone(task) as Arc<dyn JobObserver>;
        let subscriptions = self.hub.subscriptions();

        let _hand_off = HandOff {
            hub: Arc::clone(&self.hub),
            task_id: task_id.clone(),
            _started: subscriptions.subscribe(
                task_id.clone(),
                NotificationKind::Started,
                Arc::clone(&observer),
                self.lease,
            ),
            _progress: subscriptions.subscribe(
                task_id.clone(),
                NotificationKind::Progress,
                observer,
                self.lease,
            ),
        };

        let (routing, reply) = self.hub.dispatch(task.command()).await?;
        let worker_id = routing.worker_id.clone();
        task.bind_remote(routing, self.hub.clone());
        info!(task_id = %task_id, worker_id = %worker_id, "Awaiting remote outcome");

        match tokio::time::timeout(self.lease, reply).await {
            Ok(Ok(result)) => Ok(result.remote()),
            Ok(Err(_)) => Err(DispatchError::Lost(worker_id)),
            Err(_) => {
                self.hub.abandon(&task_id).await;
                Err(DispatchError::LeaseExpired(self.lease))
            }
        }
    }
}
