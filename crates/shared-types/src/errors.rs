//! # Error Types
//!
//! Errors shared across crates: event codec and template-channel framing.

use crate::envelope::MiningEventType;
use thiserror::Error;

/// Errors from the mining-event codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    #[error("Unsupported envelope version: received {received}, supported {supported}")]
    UnsupportedVersion { received: u16, supported: u16 },

    #[error("Event type mismatch: envelope says {declared}, payload is {payload}")]
    TypeMismatch {
        declared: MiningEventType,
        payload: MiningEventType,
    },

    #[error("Invalid event id: {0}")]
    InvalidEventId(String),
}

/// Errors from template-channel framing.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Connection closed by peer")]
    Closed,

    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the underlying connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WireError::Malformed(_))
    }
}
