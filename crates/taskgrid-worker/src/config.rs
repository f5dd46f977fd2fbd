//! Worker configuration.

use std::time::Duration;

use clap::Parser;
use taskgrid_core::WorkerId;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "taskgrid-worker")]
#[command(about = "Runs TaskGrid tasks handed out by a dispatch hub")]
pub struct Args {
    /// Dispatch hub address
    #[arg(long, visible_alias = "hub", default_value = "127.0.0.1:7070")]
    pub hub_addr: String,

    /// Worker ID (generated when omitted)
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Maximum concurrent tasks
    #[arg(long, default_value = "4")]
    pub max_concurrent: u32,

    /// Heartbeat interval in seconds
    #[arg(long, default_value = "15")]
    pub heartbeat_interval_secs: u64,

    /// Reconnection delay in seconds
    #[arg(long, default_value = "5")]
    pub reconnect_delay_secs: u64,

    /// Seconds running tasks get to finish on shutdown before they are cancelled
    #[arg(long, default_value = "0")]
    pub shutdown_grace_secs: u64,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Dispatch hub address.
    pub hub_addr: String,

    /// Worker ID.
    pub worker_id: WorkerId,

    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,

    /// Reconnection delay on connection loss (seconds).
    pub reconnect_delay_secs: u64,

    /// Maximum concurrent tasks this worker runs.
    pub max_concurrent: u32,

    /// Drain period on shutdown (seconds).
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub_addr: "127.0.0.1:7070".to_string(),
            worker_id: WorkerId::generate(),
            heartbeat_interval_secs: 15,
            reconnect_delay_secs: 5,
            max_concurrent: 4,
            shutdown_grace_secs: 0,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            hub_addr: args.hub_addr,
            worker_id: args
                .worker_id
                .map(WorkerId::new)
                .unwrap_or_else(WorkerId::generate),
            heartbeat_interval_secs: args.heartbeat_interval_secs,
            reconnect_delay_secs: args.reconnect_delay_secs,
            max_concurrent: args.max_concurrent.max(1),
            shutdown_grace_secs: args.shutdown_grace_secs,
        }
    }
}
