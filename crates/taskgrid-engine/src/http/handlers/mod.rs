//! HTTP request handlers.

mod health;
mod tasks;
mod workers;

pub use health::{health_check, metrics_handler};
pub use tasks::{
    add_email_alert, cancel_task, check_result, get_progress, get_result, get_task, list_tasks,
    submit_task,
};
pub use workers::list_workers_json;
