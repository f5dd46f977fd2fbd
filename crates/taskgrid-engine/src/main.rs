//! TaskGrid Server
//!
//! Runs the submission engine with its HTTP surface and the dispatch hub
//! remote workers connect to.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use taskgrid_engine::http::{self, ApiState};
use taskgrid_engine::{
    DispatchHub, EngineConfig, GridMonitor, HubConfig, RemoteDispatcher, TaskCatalog,
    TaskRunningService,
};

#[derive(Parser, Debug)]
#[command(name = "taskgrid-server")]
#[command(about = "TaskGrid submission engine and dispatch hub")]
struct Args {
    /// HTTP API address
    #[arg(long, default_value = "127.0.0.1:8080")]
    http_addr: SocketAddr,

    /// Address workers connect to
    #[arg(long, default_value = "127.0.0.1:7070")]
    hub_addr: SocketAddr,

    /// Run without the dispatch hub (every task runs locally)
    #[arg(long)]
    local_only: bool,

    /// Size of the local worker pool
    #[arg(long, default_value = "4")]
    max_concurrent_tasks: usize,

    /// Minutes a finished task stays queryable
    #[arg(long, default_value = "10")]
    retention_minutes: i64,

    /// Seconds between registry sweeps
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Seconds shutdown waits for cancelled tasks
    #[arg(long, default_value = "10")]
    shutdown_grace_secs: u64,

    /// Upper bound on a remote hand-off (seconds)
    #[arg(long, default_value = "21600")]
    subscription_lease_secs: u64,

    /// Seconds without a heartbeat before a worker is dropped
    #[arg(long, default_value = "45")]
    heartbeat_timeout_secs: u64,

    /// Seconds between grid health probes (0 disables them)
    #[arg(long, default_value = "0")]
    grid_probe_interval_secs: u64,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            retention_minutes: self.retention_minutes,
            sweep_interval_secs: self.sweep_interval_secs,
            shutdown_grace_secs: self.shutdown_grace_secs,
        }
    }

    fn hub_config(&self) -> HubConfig {
        HubConfig {
            bind_addr: self.hub_addr.to_string(),
            subscription_lease_secs: self.subscription_lease_secs,
            heartbeat_timeout_secs: self.heartbeat_timeout_secs,
            ..HubConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let shutdown = CancellationToken::new();

    let mut service = TaskRunningService::new(args.engine_config(), TaskCatalog::builtin());
    let mut hub_server = None;
    if !args.local_only {
        let hub = DispatchHub::new(args.hub_config());
        let listener = TcpListener::bind(args.hub_addr).await?;
        info!(addr = %args.hub_addr, "Dispatch hub listening");
        hub_server = Some(tokio::spawn(
            Arc::clone(&hub).serve(listener, shutdown.child_token()),
        ));
        service = service.with_dispatcher(Arc::new(RemoteDispatcher::new(hub)));
    }
    let service = Arc::new(service);
    service.init();

    let mut state = ApiState::new(Arc::clone(&service));
    if args.grid_probe_interval_secs > 0 && !args.local_only {
        let monitor = GridMonitor::new(Arc::clone(&service), Duration::from_secs(30));
        tokio::spawn(Arc::clone(&monitor).run(
            Duration::from_secs(args.grid_probe_interval_secs),
            shutdown.child_token(),
        ));
        state = state.with_monitor(monitor);
    }

    let router = http::create_router(Arc::new(state));
    let http_listener = TcpListener::bind(args.http_addr).await?;
    info!(addr = %args.http_addr, "HTTP server listening");

    let http_shutdown = shutdown.clone();
    let http_server = axum::serve(http_listener, router)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await });

    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    shutdown.cancel();
    service.shutdown().await;
    if let Some(handle) = hub_server {
        handle.abort();
    }
    info!("TaskGrid server stopped");
    Ok(())
}
