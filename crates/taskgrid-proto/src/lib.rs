//! Wire contract between the TaskGrid dispatch hub and worker processes.
//!
//! This crate contains:
//! - Message enums for both directions of a worker connection
//! - Line-delimited JSON framing over any byte stream

pub mod codec;
pub mod message;

// Re-export commonly used types
pub use codec::{decode, encode, framed, MessageFrames, ProtoError, MAX_FRAME_LEN};
pub use message::{HubMessage, WorkerMessage};
