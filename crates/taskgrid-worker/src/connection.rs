//! Connection management for the worker.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use taskgrid_core::{WorkerInfo, WorkerStatus};
use taskgrid_engine::TaskCatalog;
use taskgrid_proto::{decode, encode, framed, HubMessage, ProtoError, WorkerMessage};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::runner::TaskRunner;

/// Errors that end a connection attempt.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to connect to hub at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Local shutdown: tasks drained and the hub told goodbye.
    Shutdown,
    /// The hub closed the connection; the caller may reconnect.
    Disconnected,
}

/// Manages connection to the dispatch hub.
pub struct WorkerConnection {
    config: Arc<Config>,
    catalog: Arc<TaskCatalog>,
}

impl WorkerConnection {
    pub fn new(config: Arc<Config>, catalog: Arc<TaskCatalog>) -> Self {
        Self { config, catalog }
    }

    /// Connect to the hub and run until disconnect or `shutdown`.
    pub async fn connect_and_run(&self, shutdown: &CancellationToken) -> Result<Exit, WorkerError> {
        info!(addr = %self.config.hub_addr, "Connecting to dispatch hub");
        let stream = TcpStream::connect(&self.config.hub_addr)
            .await
            .map_err(|source| WorkerError::Connect {
                addr: self.config.hub_addr.clone(),
                source,
            })?;
        self.run_on(stream, shutdown).await
    }

    fn worker_info(&self) -> WorkerInfo {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        self.catalog.task_types().into_iter().fold(
            WorkerInfo::new(self.config.worker_id.clone(), hostname)
                .with_max_concurrent(self.config.max_concurrent),
            WorkerInfo::with_task_type,
        )
    }

    /// Run the worker protocol over an established stream.
    pub async fn run_on<S>(&self, stream: S, shutdown: &CancellationToken) -> Result<Exit, WorkerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut inbound) = framed(stream).split();
        let (tx, rx) = mpsc::unbounded_channel::<WorkerMessage>();

        let writer = tokio::spawn(async move {
            let mut outbound = UnboundedReceiverStream::new(rx);
            while let Some(msg) = outbound.next().await {
                let last = matches!(msg, WorkerMessage::Goodbye { .. });
                let line = match encode(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(error = %e, "Failed to encode worker message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(line).await {
                    warn!(error = %e, "Failed to write to hub");
                    break;
                }
                if last {
                    break;
                }
            }
        });

        let info = self.worker_info();
        info!(
            worker_id = %info.worker_id,
            task_types = ?info.task_types,
            "Connected to dispatch hub, sending Hello"
        );
        // cannot fail: the writer holds the receiver
        let _ = tx.send(WorkerMessage::Hello { info });

        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&self.catalog),
            self.config.max_concurrent,
            tx.clone(),
        ));
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(run_heartbeat_loop(
            tx.clone(),
            Arc::clone(&self.config),
            Arc::clone(&runner),
            heartbeat_stop.clone(),
        ));

        let exit = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Exit::Shutdown,
                frame = inbound.next() => {
                    let line = match frame {
                        Some(Ok(line)) => line,
                        Some(Err(e)) => {
                            heartbeat_stop.cancel();
                            heartbeat.abort();
                            runner.cancel_all();
                            writer.abort();
                            return Err(ProtoError::from(e).into());
                        }
                        None => break Exit::Disconnected,
                    };
                    match decode::<HubMessage>(&line) {
                        Ok(msg) => handle_hub_message(&runner, msg),
                        Err(e) => warn!(error = %e, "Discarding malformed hub message"),
                    }
                }
            }
        };

        match exit {
            Exit::Shutdown => {
                info!("Draining tasks before leaving the hub");
                // heartbeats keep flowing during the drain and report Draining
                runner.shutdown(self.config.shutdown_grace()).await;
                heartbeat_stop.cancel();
                let _ = heartbeat.await;
                let _ = tx.send(WorkerMessage::Goodbye {
                    worker_id: self.config.worker_id.clone(),
                });
                if writer.await.is_err() {
                    warn!("Writer task ended abnormally");
                }
            }
            Exit::Disconnected => {
                heartbeat_stop.cancel();
                heartbeat.abort();
                runner.cancel_all();
                writer.abort();
            }
        }

        info!(exit = ?exit, "Disconnected from dispatch hub");
        Ok(exit)
    }
}

fn handle_hub_message(runner: &TaskRunner, msg: HubMessage) {
    match msg {
        HubMessage::Welcome { worker_id } => {
            info!(worker_id = %worker_id, "Registered with dispatch hub");
        }
        HubMessage::Assign { command } => runner.spawn(command),
        HubMessage::Control { control } => {
            let applied = runner.control(control.clone());
            debug!(task_id = %control.task_id, request = ?control.request, applied, "Control received");
        }
    }
}

async fn run_heartbeat_loop(
    tx: mpsc::UnboundedSender<WorkerMessage>,
    config: Arc<Config>,
    runner: Arc<TaskRunner>,
    stop: CancellationToken,
) {
    let mut interval_timer = tokio::time::interval(config.heartbeat_interval());

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval_timer.tick() => {}
        }

        let active_tasks = runner.active_count() as u32;
        let status = if runner.is_draining() {
            WorkerStatus::Draining
        } else if active_tasks > 0 {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        };

        let heartbeat = WorkerMessage::Heartbeat {
            worker_id: config.worker_id.clone(),
            status,
            active_tasks,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        if tx.send(heartbeat).is_err() {
            // Channel closed, connection lost
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use taskgrid_core::{SecurityContext, TaskCommand, TaskState, WorkerId};
    use taskgrid_engine::config::{EngineConfig, HubConfig};
    use taskgrid_engine::task::MONITOR_TASK_TYPE;
    use taskgrid_engine::{DispatchHub, RemoteDispatcher, TaskRunningService};

    struct Grid {
        hub: Arc<DispatchHub>,
        service: Arc<TaskRunningService>,
        shutdown: CancellationToken,
        worker: tokio::task::JoinHandle<Result<Exit, WorkerError>>,
    }

    async fn grid() -> Grid {
        let hub = DispatchHub::new(HubConfig::default());
        let (hub_side, worker_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(Arc::clone(&hub).serve_connection(hub_side));

        let config = Arc::new(Config {
            worker_id: WorkerId::new("w-1"),
            heartbeat_interval_secs: 1,
            shutdown_grace_secs: 1,
            ..Config::default()
        });
        let connection = WorkerConnection::new(config, Arc::new(TaskCatalog::builtin()));
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let worker = tokio::spawn(async move { connection.run_on(worker_side, &token).await });

        wait_until(|| {
            let hub = Arc::clone(&hub);
            async move { hub.is_available(MONITOR_TASK_TYPE).await }
        })
        .await;

        let service = Arc::new(
            TaskRunningService::new(EngineConfig::default(), TaskCatalog::builtin())
                .with_dispatcher(Arc::new(RemoteDispatcher::new(Arc::clone(&hub)))),
        );
        Grid {
            hub,
            service,
            shutdown,
            worker,
        }
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn monitor(duration_ms: u64) -> TaskCommand {
        TaskCommand::new(MONITOR_TASK_TYPE, SecurityContext::new("alice"))
            .remote_only()
            .with_parameters(json!({ "duration_ms": duration_ms }))
    }

    #[tokio::test]
    async fn test_remote_task_runs_on_worker() {
        let grid = grid().await;
        let task_id = grid.service.submit_remote(monitor(10)).await.unwrap();
        let task = grid.service.get_submitted_task(&task_id).await.unwrap();

        assert_eq!(task.wait().await, TaskState::Finished);
        let result = task.result().unwrap();
        assert!(result.ran_remotely);
        assert_eq!(result.answer, Some(json!({ "slept_ms": 10 })));
        assert_eq!(task.worker_id(), Some(WorkerId::new("w-1")));
        assert!(task.started_at().is_some());
        assert!(task.progress(0).last().unwrap().done);
        assert_eq!(grid.hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_cancel_reaches_worker() {
        let grid = grid().await;
        let task_id = grid.service.submit_remote(monitor(60_000)).await.unwrap();
        let task = grid.service.get_submitted_task(&task_id).await.unwrap();

        wait_until(|| {
            let task = Arc::clone(&task);
            async move { task.status() == TaskState::Running }
        })
        .await;
        assert!(task.cancel().await);

        assert_eq!(task.wait().await, TaskState::Cancelled);
        assert!(task.result().unwrap().failure.unwrap().is_cancellation());
    }

    #[tokio::test]
    async fn test_shutdown_says_goodbye() {
        let grid = grid().await;
        grid.shutdown.cancel();

        let exit = grid.worker.await.unwrap().unwrap();
        assert_eq!(exit, Exit::Shutdown);
        wait_until(|| {
            let hub = Arc::clone(&grid.hub);
            async move { !hub.is_connected(&WorkerId::new("w-1")).await }
        })
        .await;
    }

    #[tokio::test]
    async fn test_hub_going_away_ends_connection() {
        let (hub_side, worker_side) = tokio::io::duplex(1024);
        let connection = WorkerConnection::new(
            Arc::new(Config::default()),
            Arc::new(TaskCatalog::builtin()),
        );
        drop(hub_side);

        let exit = connection
            .run_on(worker_side, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exit, Exit::Disconnected);
    }
}
