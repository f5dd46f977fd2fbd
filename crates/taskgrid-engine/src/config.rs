//! Engine and dispatch hub configuration.

use std::time::Duration;

/// Submission engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the local worker pool.
    pub max_concurrent_tasks: usize,

    /// How long a finished task stays queryable (minutes).
    pub retention_minutes: i64,

    /// Interval between sweeps of the task registry (seconds).
    pub sweep_interval_secs: u64,

    /// How long shutdown waits for cancelled tasks to settle (seconds).
    pub shutdown_grace_secs: u64,
}

impl EngineConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.retention_minutes)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            retention_minutes: 10,
            sweep_interval_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

/// Dispatch hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address workers connect to.
    pub bind_addr: String,

    /// Upper bound on how long a remote hand-off may wait for its outcome (seconds).
    pub subscription_lease_secs: u64,

    /// Interval between lease and heartbeat checks (seconds).
    pub reap_interval_secs: u64,

    /// Heartbeat age after which a worker is considered gone (seconds).
    pub heartbeat_timeout_secs: u64,

    /// Outbound message buffer per worker connection.
    pub outbound_buffer: usize,
}

impl HubConfig {
    pub fn subscription_lease(&self) -> Duration {
        Duration::from_secs(self.subscription_lease_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_secs as i64)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7070".to_string(),
            subscription_lease_secs: 6 * 60 * 60,
            reap_interval_secs: 30,
            heartbeat_timeout_secs: 45,
            outbound_buffer: 64,
        }
    }
}
