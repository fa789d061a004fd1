//! Error types for the failover controller

use rp_02_template_sync::TemplateSyncError;
use thiserror::Error;

/// Result type alias for failover operations
pub type Result<T> = std::result::Result<T, FailoverError>;

/// Errors raised while switching or refreshing template authority
#[derive(Debug, Error)]
pub enum FailoverError {
    /// Local template generation or installation failed
    #[error("Template sync error: {0}")]
    TemplateSync(#[from] TemplateSyncError),

    /// The channel event stream ended
    #[error("Template channel event stream closed")]
    EventsClosed,
}

impl FailoverError {
    /// Whether the local node could not be reached or answered badly.
    pub fn is_local_node_failure(&self) -> bool {
        matches!(self, Self::TemplateSync(TemplateSyncError::Node(_)))
    }
}
