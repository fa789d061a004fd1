//! Error types for the relay connection manager

use shared_types::{RelayId, WireError};
use thiserror::Error;

/// Result type alias for relay manager operations
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Errors that can occur in the relay connection manager
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Relay failed the challenge/response
    #[error("Authentication failed for relay {relay_id}")]
    AuthenticationFailed {
        /// Relay that failed
        relay_id: RelayId,
    },

    /// Relay speaks another protocol version
    #[error("Unsupported protocol version {received}, expected {expected}")]
    ProtocolVersion {
        /// Version announced by the relay
        received: u16,
        /// Version this primary speaks
        expected: u16,
    },

    /// Frame not valid at this point of the session
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    /// Handshake not completed in time
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Template channel framing or I/O error
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// The manager task has stopped
    #[error("Relay manager stopped")]
    ManagerStopped,
}

impl ManagerError {
    /// Check if the relay should simply retry (reconnect)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::HandshakeTimeout | Self::Wire(_))
    }
}
