//! Completion notices for submitters who asked for one.

use std::fmt::Write;

use taskgrid_core::{ProgressEntry, TaskId, TaskState};
use thiserror::Error;
use tracing::info;

use crate::submitted::SubmittedTask;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("No email address known for {0}")]
    NoRecipient(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Notice sent when a job reaches a terminal state.
#[derive(Debug, Clone)]
pub struct CompletionNotice {
    pub task_id: TaskId,
    pub task_type: String,
    pub target: Option<String>,
    pub recipient: String,
    pub state: TaskState,
    pub log: Vec<ProgressEntry>,
}

impl CompletionNotice {
    /// Build the notice for a finished task.
    pub fn for_task(task: &SubmittedTask) -> Result<Self, MailError> {
        let submitter = task.submitter();
        let recipient = submitter
            .email
            .clone()
            .ok_or_else(|| MailError::NoRecipient(submitter.principal.clone()))?;
        let signature = task.signature();
        Ok(Self {
            task_id: task.task_id().clone(),
            task_type: signature.task_type.clone(),
            target: signature.target.clone(),
            recipient,
            state: task.status(),
            log: task.progress(0),
        })
    }

    pub fn subject(&self) -> String {
        let outcome = match self.state {
            TaskState::Finished => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "was cancelled",
            _ => "is still in progress",
        };
        match &self.target {
            Some(target) => format!("Your {} job for {} {}", self.task_type, target, outcome),
            None => format!("Your {} job {}", self.task_type, outcome),
        }
    }

    pub fn body(&self) -> String {
        let mut body = String::new();
        writeln!(body, "Job {} finished in state {}.", self.task_id, self.state).ok();
        if !self.log.is_empty() {
            writeln!(body).ok();
            writeln!(body, "Progress log:").ok();
            for entry in &self.log {
                writeln!(
                    body,
                    "  [{}] {:>3}% {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.percent,
                    entry.message
                )
                .ok();
            }
        }
        body
    }
}

/// Outbound mail delivery.
pub trait Mailer: Send + Sync {
    fn send(&self, notice: &CompletionNotice) -> Result<(), MailError>;
}

/// Mailer that records notices in the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, notice: &CompletionNotice) -> Result<(), MailError> {
        info!(
            task_id = %notice.task_id,
            to = %notice.recipient,
            subject = %notice.subject(),
            "Completion notice"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use taskgrid_core::{SecurityContext, TaskCommand, TaskResult};

    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub(crate) sent: Mutex<Vec<CompletionNotice>>,
    }

    impl Mailer for RecordingMailer {
        fn send(&self, notice: &CompletionNotice) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    fn finished(email: Option<&str>) -> std::sync::Arc<SubmittedTask> {
        let mut ctx = SecurityContext::new("alice");
        if let Some(email) = email {
            ctx = ctx.with_email(email);
        }
        let command = TaskCommand::new("report", ctx)
            .with_id(TaskId::new("t-1"))
            .with_target("study-7");
        let task = SubmittedTask::new(command, true);
        task.begin_run();
        task.append_progress(ProgressEntry::new(50, "halfway"));
        task.complete(TaskResult::success(TaskId::new("t-1"), json!(1)));
        task
    }

    #[test]
    fn test_notice_contents() {
        let notice = CompletionNotice::for_task(&finished(Some("alice@example.org"))).unwrap();

        assert_eq!(notice.recipient, "alice@example.org");
        assert_eq!(notice.subject(), "Your report job for study-7 completed");
        let body = notice.body();
        assert!(body.contains("FINISHED"));
        assert!(body.contains(" 50% halfway"));
    }

    #[test]
    fn test_missing_recipient() {
        assert!(matches!(
            CompletionNotice::for_task(&finished(None)),
            Err(MailError::NoRecipient(p)) if p == "alice"
        ));
    }
}
