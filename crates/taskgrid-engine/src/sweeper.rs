//! Periodic cleanup of the task registry.
//!
//! Finished tasks are evicted once their retention window has passed. Tasks
//! that waited in the queue or ran longer than their command allows are
//! cancelled, with an explanatory progress entry and a forced completion
//! notice so the submitter learns what happened.

use chrono::{DateTime, Duration, Utc};
use taskgrid_core::{ProgressEntry, TaskId, TaskState};
use tracing::{info, warn};

use crate::registry::TaskRegistry;
use crate::submitted::SubmittedTask;

/// What a sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<TaskId>,
    pub cancelled: Vec<TaskId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.cancelled.is_empty()
    }
}

/// Run one sweep as of `now`.
pub async fn sweep(registry: &TaskRegistry, retention: Duration, now: DateTime<Utc>) -> SweepReport {
    let evicted = registry.evict_finished_before(now - retention).await;

    let mut cancelled = Vec::new();
    for task in registry.active().await {
        let Some(reason) = overdue(&task, now) else {
            continue;
        };
        warn!(task_id = %task.task_id(), "{reason}");
        task.append_progress(ProgressEntry::new(task.last_percent(), reason));
        task.request_email();
        if task.cancel().await {
            cancelled.push(task.task_id().clone());
        }
    }

    let report = SweepReport { evicted, cancelled };
    if !report.is_empty() {
        info!(
            evicted = report.evicted.len(),
            cancelled = report.cancelled.len(),
            "Registry sweep"
        );
    }
    report
}

fn overdue(task: &SubmittedTask, now: DateTime<Utc>) -> Option<String> {
    let command = task.command();
    match task.status() {
        TaskState::Queued => {
            let waited = now - command.submission_time?;
            (waited > Duration::minutes(i64::from(command.max_queue_minutes))).then(|| {
                format!(
                    "The job was queued for too long, so it was cancelled after waiting {} minutes.",
                    command.max_queue_minutes
                )
            })
        }
        TaskState::Running => {
            let limit = command.max_runtime_minutes?;
            let ran = now - command.start_time?;
            (ran > Duration::minutes(i64::from(limit))).then(|| {
                format!("The job took too long to run, so it was cancelled after {limit} minutes.")
            })
        }
        _ => None,
    }
}
