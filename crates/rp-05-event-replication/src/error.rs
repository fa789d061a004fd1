//! Error types for event replication

use shared_bus::ChannelError;
use shared_types::CodecError;
use thiserror::Error;

/// Result type alias for replication operations
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors in the publish or ingest path
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Event could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Replication channel failure
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Persistence store failure
    #[error("Store error: {0}")]
    Store(String),
}

impl ReplicationError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Codec(_) => false,
            Self::Channel(e) => e.is_transient(),
            Self::Store(_) => true,
        }
    }
}
