//! Periodic health probe of the remote workers.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use taskgrid_core::{SecurityContext, TaskCommand, TaskState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::service::TaskRunningService;
use crate::task::MONITOR_TASK_TYPE;

/// Principal the probes are submitted as.
pub const MONITOR_PRINCIPAL: &str = "grid-monitor";

/// Outcome of the latest probe.
#[derive(Debug, Clone, Serialize)]
pub struct GridStatus {
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub detail: String,
}

impl GridStatus {
    fn healthy() -> Self {
        Self {
            healthy: true,
            checked_at: Utc::now(),
            detail: "grid answered".to_string(),
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            checked_at: Utc::now(),
            detail: detail.into(),
        }
    }
}

/// Submits a remote-only monitor task and records whether a worker answered.
pub struct GridMonitor {
    service: Arc<TaskRunningService>,
    probe_timeout: Duration,
    last: Mutex<Option<GridStatus>>,
}

impl GridMonitor {
    pub fn new(service: Arc<TaskRunningService>, probe_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            service,
            probe_timeout,
            last: Mutex::new(None),
        })
    }

    pub fn last_status(&self) -> Option<GridStatus> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn probe(&self) -> GridStatus {
        let command = TaskCommand::new(MONITOR_TASK_TYPE, SecurityContext::new(MONITOR_PRINCIPAL))
            .remote_only()
            .with_parameters(json!({ "duration_ms": 0 }));

        let status = match self.service.submit_remote(command).await {
            Err(e) => GridStatus::unhealthy(e.to_string()),
            Ok(task_id) => match self.service.get_submitted_task(&task_id).await {
                None => GridStatus::unhealthy("probe task was evicted before it finished"),
                Some(task) => match tokio::time::timeout(self.probe_timeout, task.wait()).await {
                    Ok(TaskState::Finished) => GridStatus::healthy(),
                    Ok(state) => GridStatus::unhealthy(format!("probe ended in state {state}")),
                    Err(_) => {
                        task.cancel().await;
                        GridStatus::unhealthy(format!(
                            "no answer within {}s",
                            self.probe_timeout.as_secs()
                        ))
                    }
                },
            },
        };

        if status.healthy {
            info!("Grid probe succeeded");
        } else {
            warn!(detail = %status.detail, "Grid probe failed");
        }
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(status.clone());
        status
    }

    /// Probe every `interval` until `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.probe().await;
                }
            }
        }
    }
}
