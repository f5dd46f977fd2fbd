//! Remote dispatch overlay.
//!
//! Commands are forwarded to worker processes connected to the
//! [`DispatchHub`]. Start and progress notifications flow back through
//! lease-bound [`SubscriptionTable`] registrations; the final outcome is
//! delivered to the [`RemoteDispatcher`] awaiting it.

mod hub;
mod interceptor;
mod subscription;

pub use hub::{ConnectedWorker, DispatchHub};
pub use interceptor::RemoteDispatcher;
pub use subscription::{JobObserver, NotificationKind, Subscription, SubscriptionTable};

#[cfg(test)]
pub(crate) use hub::tests::FakeWorker;

use std::time::Duration;

use async_trait::async_trait;
use taskgrid_core::{TaskControl, WorkerId};
use thiserror::Error;

/// Delivery of out-of-band requests to a worker.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Returns true if the message reached the worker's connection.
    async fn send_control(&self, worker_id: &WorkerId, control: TaskControl) -> bool;
}

/// Failures of a remote hand-off.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No worker available for task type '{0}'")]
    Unavailable(String),

    #[error("Worker {0} went away before reporting an outcome")]
    Lost(WorkerId),

    #[error("No outcome within the {0:?} lease")]
    LeaseExpired(Duration),
}
