//! Lease-bound notification registrations.
//!
//! A [`Subscription`] is released when dropped; registrations whose lease
//! ran out are removed by [`SubscriptionTable::expire`]. Either way the
//! table never keeps observers of a finished hand-off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use taskgrid_core::{ProgressEntry, TaskId};
use tokio::time::Instant;
use tracing::{debug, info};

/// Receives notifications about one remote job.
pub trait JobObserver: Send + Sync {
    fn on_started(&self, _task_id: &TaskId) {}

    fn on_progress(&self, _task_id: &TaskId, _entry: ProgressEntry) {}
}

/// What a registration listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Fires at most once.
    Started,
    Progress,
}

struct Registration {
    task_id: TaskId,
    kind: NotificationKind,
    observer: Arc<dyn JobObserver>,
    expires_at: Instant,
}

/// Observers of remote jobs, keyed by registration id.
#[derive(Default)]
pub struct SubscriptionTable {
    registrations: Mutex<HashMap<u64, Registration>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `observer` for `kind` notifications about `task_id`.
    pub fn subscribe(
        self: &Arc<Self>,
        task_id: TaskId,
        kind: NotificationKind,
        observer: Arc<dyn JobObserver>,
        lease: Duration,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            Registration {
                task_id: task_id.clone(),
                kind,
                observer,
                expires_at: Instant::now() + lease,
            },
        );
        debug!(task_id = %task_id, kind = ?kind, subscription = id, "Subscribed");
        Subscription {
            id,
            task_id,
            table: Arc::downgrade(self),
        }
    }

    /// Fire the start registrations for `task_id` and drop them.
    pub fn notify_started(&self, task_id: &TaskId) -> usize {
        let now = Instant::now();
        let observers: Vec<Arc<dyn JobObserver>> = {
            let mut registrations = self.lock();
            let ids: Vec<u64> = registrations
                .iter()
                .filter(|(_, r)| {
                    r.kind == NotificationKind::Started && &r.task_id == task_id && r.expires_at > now
                })
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| registrations.remove(id))
                .map(|r| r.observer)
                .collect()
        };
        for observer in &observers {
            observer.on_started(task_id);
        }
        observers.len()
    }

    /// Deliver a progress entry to the progress registrations for `task_id`.
    pub fn notify_progress(&self, task_id: &TaskId, entry: ProgressEntry) -> usize {
        let now = Instant::now();
        let observers: Vec<Arc<dyn JobObserver>> = self
            .lock()
            .values()
            .filter(|r| {
                r.kind == NotificationKind::Progress && &r.task_id == task_id && r.expires_at > now
            })
            .map(|r| Arc::clone(&r.observer))
            .collect();
        for observer in &observers {
            observer.on_progress(task_id, entry.clone());
        }
        observers.len()
    }

    /// Remove registrations whose lease ended at or before `now`.
    pub fn expire(&self, now: Instant) -> usize {
        let mut registrations = self.lock();
        let before = registrations.len();
        registrations.retain(|_, r| r.expires_at > now);
        let expired = before - registrations.len();
        if expired > 0 {
            info!(expired, "Dropped expired subscription leases");
        }
        expired
    }

    /// Live registrations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Live registrations for one task.
    pub fn count_for(&self, task_id: &TaskId) -> usize {
        self.lock().values().filter(|r| &r.task_id == task_id).count()
    }

    fn release(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }
}

/// Handle of one registration. Dropping it unregisters.
pub struct Subscription {
    id: u64,
    task_id: TaskId,
    table: Weak<SubscriptionTable>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            if table.release(self.id) {
                debug!(task_id = %self.task_id, subscription = self.id, "Released subscription");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        started: Mutex<usize>,
        progress: Mutex<Vec<u8>>,
    }

    impl JobObserver for Counter {
        fn on_started(&self, _task_id: &TaskId) {
            *self.started.lock().unwrap() += 1;
        }

        fn on_progress(&self, _task_id: &TaskId, entry: ProgressEntry) {
            self.progress.lock().unwrap().push(entry.percent);
        }
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[test]
    fn test_drop_releases_registration() {
        let table = SubscriptionTable::new();
        let observer = Arc::new(Counter::default());
        let sub = table.subscribe(TaskId::new("t-1"), NotificationKind::Progress, observer, LEASE);
        assert_eq!(table.len(), 1);

        drop(sub);
        assert!(table.is_empty());
    }

    #[test]
    fn test_started_fires_once() {
        let table = SubscriptionTable::new();
        let observer = Arc::new(Counter::default());
        let _sub = table.subscribe(
            TaskId::new("t-1"),
            NotificationKind::Started,
            observer.clone(),
            LEASE,
        );

        assert_eq!(table.notify_started(&TaskId::new("t-1")), 1);
        assert_eq!(table.notify_started(&TaskId::new("t-1")), 0);
        assert_eq!(*observer.started.lock().unwrap(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_progress_routed_by_task() {
        let table = SubscriptionTable::new();
        let mine = Arc::new(Counter::default());
        let other = Arc::new(Counter::default());
        let _a = table.subscribe(TaskId::new("t-1"), NotificationKind::Progress, mine.clone(), LEASE);
        let _b = table.subscribe(TaskId::new("t-2"), NotificationKind::Progress, other.clone(), LEASE);

        table.notify_progress(&TaskId::new("t-1"), ProgressEntry::new(10, "a"));
        table.notify_progress(&TaskId::new("t-1"), ProgressEntry::new(20, "b"));

        assert_eq!(*mine.progress.lock().unwrap(), vec![10, 20]);
        assert!(other.progress.lock().unwrap().is_empty());
        assert_eq!(table.count_for(&TaskId::new("t-1")), 1);
    }

    #[test]
    fn test_expired_leases_are_reaped() {
        let table = SubscriptionTable::new();
        let observer = Arc::new(Counter::default());
        let short = table.subscribe(
            TaskId::new("t-1"),
            NotificationKind::Progress,
            observer.clone(),
            Duration::from_millis(1),
        );
        let _long = table.subscribe(TaskId::new("t-2"), NotificationKind::Progress, observer, LEASE);

        assert_eq!(table.expire(Instant::now() + Duration::from_secs(1)), 1);
        assert_eq!(table.len(), 1);

        // the handle outliving its lease is harmless
        drop(short);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_handle_outliving_table() {
        let table = SubscriptionTable::new();
        let sub = table.subscribe(
            TaskId::new("t-1"),
            NotificationKind::Started,
            Arc::new(Counter::default()),
            LEASE,
        );
        drop(table);
        drop(sub);
    }
}
