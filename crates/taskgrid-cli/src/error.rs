//! Error types for the CLI.

use thiserror::Error;

/// Errors that can occur when talking to the engine.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine rejected the request.
    #[error("{status}: {message}")]
    Api {
        status: u16,
        message: String,
        conflicting_task_id: Option<String>,
    },

    /// Bad input on the command line.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
