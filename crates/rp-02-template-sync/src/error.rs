//! Error types for template sync

use shared_types::{NodeError, TemplateId, WireError};
use thiserror::Error;

/// Result type alias for template sync operations
pub type Result<T> = std::result::Result<T, TemplateSyncError>;

/// Errors that can occur while syncing templates
#[derive(Debug, Error)]
pub enum TemplateSyncError {
    /// Template sequence not greater than the current one
    #[error("Stale template: sequence {received} does not advance current {current}")]
    StaleTemplate {
        /// Sequence of the discarded template
        received: u64,
        /// Currently applied work
        current: TemplateId,
    },

    /// Template failed structural checks
    #[error("Malformed template with sequence {sequence}")]
    MalformedTemplate {
        /// Sequence of the rejected template
        sequence: u64,
    },

    /// Local node failure
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// Primary refused our credential
    #[error("Authentication rejected by primary: {0}")]
    AuthRejected(String),

    /// Handshake did not follow the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connect or handshake did not complete in time
    #[error("Timed out connecting to primary")]
    ConnectTimeout,

    /// Template channel framing or I/O error
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
}

impl TemplateSyncError {
    /// Protocol-level rejects are discarded with a warning; everything else
    /// is a transport problem that resolves by reconnecting.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            Self::StaleTemplate { .. } | Self::MalformedTemplate { .. }
        )
    }
}
