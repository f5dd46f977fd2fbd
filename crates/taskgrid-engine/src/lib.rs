//! TaskGrid Submission Engine
//!
//! Accepts jobs, runs them on a bounded local pool or hands them to remote
//! workers through the dispatch hub, and keeps their state, progress and
//! outcome queryable until they are swept.

pub mod config;
pub mod error;
pub mod executing;
pub mod grid_monitor;
pub mod http;
pub mod mail;
pub mod metrics;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod security;
pub mod service;
pub mod submitted;
pub mod sweeper;
pub mod task;

pub use config::{EngineConfig, HubConfig};
pub use error::EngineError;
pub use executing::{ExecutingTask, TaskLifecycleHandler};
pub use grid_monitor::GridMonitor;
pub use progress::{ProgressReporter, ProgressSink};
pub use remote::{DispatchHub, RemoteDispatcher};
pub use service::{ProgressStatusService, TaskRunningService};
pub use submitted::SubmittedTask;
pub use task::{Task, TaskCatalog, TaskContext, TaskError};
