//! Error types for block submission

use shared_types::SubmitRejected;
use thiserror::Error;

/// Result type alias for block submission
pub type Result<T> = std::result::Result<T, SubmissionError>;

/// Errors from racing a block candidate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// Neither path confirmed the block
    #[error("Block {block_hash} rejected on both paths (local: {local}; remote: {remote})")]
    BothPathsFailed {
        block_hash: String,
        local: SubmitRejected,
        remote: SubmitRejected,
    },

    /// The same block is already being raced
    #[error("Block {block_hash} is already being submitted")]
    AlreadyRacing { block_hash: String },
}
