//! Prometheus text exposition of engine and hub state.

use std::fmt::Write;

use taskgrid_core::{TaskState, WorkerStatus};

use crate::remote::DispatchHub;
use crate::service::TaskRunningService;

const TASK_STATES: [TaskState; 5] = [
    TaskState::Queued,
    TaskState::Running,
    TaskState::Finished,
    TaskState::Failed,
    TaskState::Cancelled,
];

/// Render all metrics.
pub async fn collect_metrics(service: &TaskRunningService, hub: Option<&DispatchHub>) -> String {
    let mut output = String::new();

    collect_task_metrics(service, &mut output).await;
    if let Some(hub) = hub {
        collect_hub_metrics(hub, &mut output).await;
    }

    output
}

async fn collect_task_metrics(service: &TaskRunningService, output: &mut String) {
    let counts = service.registry().count_by_state().await;

    writeln!(output, "# HELP taskgrid_tasks Tracked tasks by state").ok();
    writeln!(output, "# TYPE taskgrid_tasks gauge").ok();
    for state in TASK_STATES {
        let count = counts.get(&state).copied().unwrap_or(0);
        writeln!(
            output,
            "taskgrid_tasks{{state=\"{}\"}} {count}",
            state.as_str().to_lowercase()
        )
        .ok();
    }

    let capacity = service.config().max_concurrent_tasks;
    let free = service.available_slots();
    writeln!(output).ok();
    writeln!(output, "# HELP taskgrid_pool_slots Local worker pool slots").ok();
    writeln!(output, "# TYPE taskgrid_pool_slots gauge").ok();
    writeln!(output, "taskgrid_pool_slots{{kind=\"capacity\"}} {capacity}").ok();
    writeln!(output, "taskgrid_pool_slots{{kind=\"free\"}} {free}").ok();
}

async fn collect_hub_metrics(hub: &DispatchHub, output: &mut String) {
    let mut idle = 0u64;
    let mut busy = 0u64;
    let mut draining = 0u64;
    for worker in hub.workers().await {
        match worker.status {
            WorkerStatus::Idle => idle += 1,
            WorkerStatus::Busy => busy += 1,
            WorkerStatus::Draining => draining += 1,
        }
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskgrid_workers_connected Connected workers by status"
    )
    .ok();
    writeln!(output, "# TYPE taskgrid_workers_connected gauge").ok();
    writeln!(output, "taskgrid_workers_connected{{status=\"idle\"}} {idle}").ok();
    writeln!(output, "taskgrid_workers_connected{{status=\"busy\"}} {busy}").ok();
    writeln!(
        output,
        "taskgrid_workers_connected{{status=\"draining\"}} {draining}"
    )
    .ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskgrid_remote_pending Remote hand-offs awaiting an outcome"
    )
    .ok();
    writeln!(output, "# TYPE taskgrid_remote_pending gauge").ok();
    writeln!(output, "taskgrid_remote_pending {}", hub.pending_count()).ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskgrid_subscriptions Live start and progress subscriptions"
    )
    .ok();
    writeln!(output, "# TYPE taskgrid_subscriptions gauge").ok();
    writeln!(output, "taskgrid_subscriptions {}", hub.subscriptions().len()).ok();
}
