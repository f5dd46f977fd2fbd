//! TaskGrid Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network transports
//! - Async runtimes
//! - Persistence
//!
//! Everything the submission engine, the dispatch hub and the workers
//! exchange is defined here.

pub mod command;
pub mod control;
pub mod error;
pub mod ids;
pub mod progress;
pub mod result;
pub mod security;
pub mod status;
pub mod worker;

// Re-export commonly used types
pub use command::{JobSignature, Routing, TaskCommand};
pub use control::{ControlRequest, TaskControl};
pub use error::CoreError;
pub use ids::{TaskId, WorkerId};
pub use progress::ProgressEntry;
pub use result::{TaskFailure, TaskResult};
pub use security::SecurityContext;
pub use status::{TaskState, WorkerStatus};
pub use worker::WorkerInfo;
