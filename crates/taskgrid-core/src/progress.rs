//! Progress log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step of job advancement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// Completion percentage, 0..=100.
    pub percent: u8,

    /// Human-readable description of the step.
    pub message: String,

    /// Set on the entry that closes the log.
    pub done: bool,

    /// When the entry was emitted.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEntry {
    /// Create an entry; percentages above 100 are clamped.
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
            done: false,
            timestamp: Utc::now(),
        }
    }

    /// Create the closing entry of a log.
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            done: true,
            ..Self::new(100, message)
        }
    }
}
