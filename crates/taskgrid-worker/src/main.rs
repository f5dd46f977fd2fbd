//! TaskGrid Worker Daemon

use std::sync::Arc;

use clap::Parser;
use taskgrid_engine::TaskCatalog;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod connection;
mod runner;

use config::{Args, Config};
use connection::{Exit, WorkerConnection};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Arc::new(Config::from(Args::parse()));
    let catalog = Arc::new(TaskCatalog::builtin());

    info!(
        worker_id = %config.worker_id,
        hub = %config.hub_addr,
        max_concurrent = config.max_concurrent,
        "Starting TaskGrid worker"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, draining");
            signal.cancel();
        }
    });

    // Reconnection loop
    loop {
        let connection = WorkerConnection::new(Arc::clone(&config), Arc::clone(&catalog));

        match connection.connect_and_run(&shutdown).await {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Disconnected) => {
                info!("Connection closed by hub");
            }
            Err(e) => {
                error!(error = %e, "Connection error");
            }
        }

        info!(
            delay_secs = config.reconnect_delay_secs,
            "Reconnecting in {} seconds...", config.reconnect_delay_secs
        );
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay()) => {}
        }
    }

    info!("Worker stopped");
    Ok(())
}
