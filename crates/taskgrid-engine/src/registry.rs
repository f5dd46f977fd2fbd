//! In-memory registry of submitted tasks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskgrid_core::{TaskId, TaskState};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::EngineError;
use crate::submitted::SubmittedTask;

/// Tasks by id. The conflict check and the insert happen under one write
/// lock, so two conflicting submissions can never both be admitted.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<SubmittedTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a task.
    ///
    /// Rejected when its id is already tracked, or when it is exclusive and
    /// the same principal has a live task with a conflicting signature.
    pub async fn insert(&self, task: Arc<SubmittedTask>) -> Result<(), EngineError> {
        let mut tasks = self.tasks.write().await;

        if tasks.contains_key(task.task_id()) {
            return Err(EngineError::DuplicateTaskId(task.task_id().clone()));
        }

        if task.is_exclusive() {
            let conflict = tasks.values().find(|existing| {
                existing.submitter().principal == task.submitter().principal
                    && existing.signature().conflicts_with(task.signature())
                    && existing.status().is_active()
            });
            if let Some(existing) = conflict {
                return Err(EngineError::ConflictingTask {
                    existing: existing.task_id().clone(),
                    task_type: task.signature().task_type.clone(),
                });
            }
        }

        tasks.insert(task.task_id().clone(), task);
        Ok(())
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<Arc<SubmittedTask>> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// All tracked tasks, oldest submission first.
    pub async fn snapshot(&self) -> Vec<Arc<SubmittedTask>> {
        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.submitted_at());
        tasks
    }

    /// Tasks not yet terminal.
    pub async fn active(&self) -> Vec<Arc<SubmittedTask>> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.status().is_active())
            .cloned()
            .collect()
    }

    /// Count of tracked tasks per state.
    pub async fn count_by_state(&self) -> HashMap<TaskState, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.read().await.values() {
            *counts.entry(task.status()).or_insert(0) += 1;
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Drop terminal tasks that finished before `cutoff`.
    pub async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<TaskId> {
        let mut tasks = self.tasks.write().await;
        let expired: Vec<TaskId> = tasks
            .values()
            .filter(|t| t.is_terminal() && t.finished_at().is_some_and(|at| at < cutoff))
            .map(|t| t.task_id().clone())
            .collect();

        for task_id in &expired {
            tasks.remove(task_id);
            info!(task_id = %task_id, "Evicted finished task");
        }
        expired
    }
}
