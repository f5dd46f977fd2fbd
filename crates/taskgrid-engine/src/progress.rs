//! Progress reporting from task bodies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use taskgrid_core::{ProgressEntry, TaskId};
use tracing::{debug, info};

/// Destination of the progress entries a task emits.
///
/// Implementations must be cheap: `emit` is called inline from the task body.
pub trait ProgressSink: Send + Sync {
    /// Called once before the task body starts.
    fn initialize(&self, _task_id: &TaskId) {}

    /// Record one entry. Entries arrive in emission order.
    fn emit(&self, task_id: &TaskId, entry: ProgressEntry);

    /// Called once after the task body returned, panicked or was dropped.
    fn tear_down(&self, _task_id: &TaskId) {}
}

/// Sink that only logs. Used when nobody tracks the task.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, task_id: &TaskId, entry: ProgressEntry) {
        info!(task_id = %task_id, percent = entry.percent, "{}", entry.message);
    }
}

/// Handle given to task bodies for reporting progress.
///
/// Cloneable; all clones stop delivering once the owning execution has been
/// torn down.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    sink: Arc<dyn ProgressSink>,
    open: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn new(task_id: TaskId, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            task_id,
            sink,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Report a percentage and a message.
    pub fn report(&self, percent: u8, message: impl Into<String>) -> bool {
        self.emit(ProgressEntry::new(percent, message))
    }

    /// Report completion.
    pub fn done(&self, message: impl Into<String>) -> bool {
        self.emit(ProgressEntry::done(message))
    }

    /// Deliver a prepared entry. Returns false once the reporter is closed.
    pub fn emit(&self, entry: ProgressEntry) -> bool {
        if !self.open.load(Ordering::Acquire) {
            debug!(task_id = %self.task_id, "Dropping progress reported after teardown");
            return false;
        }
        self.sink.emit(&self.task_id, entry);
        true
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Installs a sink for one execution and tears it down on drop.
pub(crate) struct Instrumentation {
    reporter: ProgressReporter,
}

impl Instrumentation {
    pub(crate) fn install(task_id: TaskId, sink: Arc<dyn ProgressSink>) -> Self {
        sink.initialize(&task_id);
        Self {
            reporter: ProgressReporter::new(task_id, sink),
        }
    }

    pub(crate) fn reporter(&self) -> ProgressReporter {
        self.reporter.clone()
    }
}

impl Drop for Instrumentation {
    fn drop(&mut self) {
        self.reporter.close();
        self.reporter.sink.tear_down(&self.reporter.task_id);
    }
}
