//! Caller-facing services.

mod progress_status;
mod running;

pub use progress_status::ProgressStatusService;
pub use running::TaskRunningService;
