//! Read and administrative operations over submitted tasks.

use std::sync::Arc;

use taskgrid_core::{ProgressEntry, SecurityContext, TaskFailure, TaskId, TaskResult};
use tracing::{info, warn};

use super::TaskRunningService;
use crate::error::EngineError;
use crate::submitted::SubmittedTask;

/// What pollers (the HTTP surface, the CLI) talk to.
///
/// Polling never raises a task's own failure while it runs; only asking
/// for the payload of a failed or cancelled task does.
#[derive(Clone)]
pub struct ProgressStatusService {
    tasks: Arc<TaskRunningService>,
}

impl ProgressStatusService {
    pub fn new(tasks: Arc<TaskRunningService>) -> Self {
        Self { tasks }
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Arc<SubmittedTask>, EngineError> {
        self.tasks
            .get_submitted_task(task_id)
            .await
            .ok_or_else(|| EngineError::NotFound(task_id.clone()))
    }

    /// Cancel a job on behalf of `caller`. Only the submitter or an admin
    /// may cancel; returns false when not allowed, unknown or finished.
    pub async fn cancel_job(&self, caller: &SecurityContext, task_id: &TaskId) -> bool {
        let Ok(task) = self.get_task(task_id).await else {
            return false;
        };
        if !caller.can_manage(task.submitter()) {
            warn!(task_id = %task_id, caller = %caller.principal, "Cancel refused");
            return false;
        }
        let cancelled = task.cancel().await;
        info!(task_id = %task_id, caller = %caller.principal, cancelled, "Cancel requested");
        cancelled
    }

    /// Payload of a finished job.
    pub async fn check_result(&self, task_id: &TaskId) -> Result<Option<serde_json::Value>, EngineError> {
        let result = self.get_result(task_id).await?;
        match result.failure {
            None => Ok(result.answer),
            Some(failure) if failure.kind == TaskFailure::CANCELLED => {
                Err(EngineError::Cancelled(task_id.clone()))
            }
            Some(failure) => Err(EngineError::TaskFailed {
                task_id: task_id.clone(),
                kind: failure.kind,
                message: failure.message,
            }),
        }
    }

    /// Full outcome of a finished job, failures included.
    pub async fn get_result(&self, task_id: &TaskId) -> Result<TaskResult, EngineError> {
        self.get_task(task_id).await?.result()
    }

    /// Progress entries from `offset` on.
    pub async fn get_progress_status(
        &self,
        task_id: &TaskId,
        offset: usize,
    ) -> Result<Vec<ProgressEntry>, EngineError> {
        Ok(self.get_task(task_id).await?.progress(offset))
    }

    /// Every tracked job. Admins only.
    pub async fn get_submitted_tasks(
        &self,
        caller: &SecurityContext,
    ) -> Result<Vec<Arc<SubmittedTask>>, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::AccessDenied(format!(
                "{} may not list all tasks",
                caller.principal
            )));
        }
        Ok(self.tasks.list_submitted_tasks().await)
    }

    /// Ask for a completion notice on behalf of `caller`.
    pub async fn add_email_alert(
        &self,
        caller: &SecurityContext,
        task_id: &TaskId,
    ) -> Result<(), EngineError> {
        let task = self.get_task(task_id).await?;
        if !caller.can_manage(task.submitter()) {
            return Err(EngineError::AccessDenied(format!(
                "{} may not change task {task_id}",
                caller.principal
            )));
        }
        task.add_email_notification().await
    }
}
