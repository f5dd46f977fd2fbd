//! Line-delimited JSON framing.
//!
//! Each message is one JSON document terminated by `\n`. Frames longer than
//! [`MAX_FRAME_LEN`] are rejected so a misbehaving peer cannot exhaust memory.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Upper bound on a single encoded message.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// A byte stream framed into message lines.
pub type MessageFrames<S> = Framed<S, LinesCodec>;

/// Wire-level errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Message could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Framing failed (oversized line or I/O failure).
    #[error("Frame error: {0}")]
    Frame(#[from] LinesCodecError),

    /// Peer closed the connection.
    #[error("Connection closed")]
    Closed,
}

/// Frame a byte stream into JSON lines.
pub fn framed<S>(stream: S) -> MessageFrames<S>
where
    S: AsyncRead + AsyncWrite,
{
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN))
}

/// Encode a message as a single line (without the terminator).
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode one line into a message.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ProtoError> {
    Ok(serde_json::from_str(line.trim_end())?)
}
