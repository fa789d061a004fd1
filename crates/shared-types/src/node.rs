//! # Node Ports
//!
//! Interfaces to the block-chain node and to the two block submission
//! routes.

use crate::entities::{display_hash, BlockCandidate, Hash, NodeTemplate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A node accepted the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAccepted {
    pub block_hash: Hash,
}

impl fmt::Display for SubmitAccepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accepted {}", display_hash(&self.block_hash))
    }
}

/// A submission path did not confirm the block.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SubmitRejected {
    /// The node evaluated and refused the block.
    #[error("Rejected by node: {reason}")]
    Rejected { reason: String },

    /// The node (or the primary) could not be reached.
    #[error("Unreachable: {reason}")]
    Unreachable { reason: String },

    /// No answer within the per-path timeout.
    #[error("Timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },
}

/// Errors talking to a node outside of block submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    #[error("Node RPC error: {0}")]
    Rpc(String),

    #[error("Malformed node response: {0}")]
    Malformed(String),
}

/// The relay's (or primary's) own full/pruned node.
#[async_trait]
pub trait LocalNode: Send + Sync {
    /// Current work from the node.
    async fn get_block_template(&self) -> Result<NodeTemplate, NodeError>;

    /// Submit a solved block.
    async fn submit_block(
        &self,
        candidate: &BlockCandidate,
    ) -> Result<SubmitAccepted, SubmitRejected>;
}

/// One route a block candidate can be submitted through.
#[async_trait]
pub trait BlockSubmitter: Send + Sync {
    async fn submit(&self, candidate: &BlockCandidate) -> Result<SubmitAccepted, SubmitRejected>;
}

/// Submits straight to a `LocalNode`.
#[derive(Clone)]
pub struct NodeSubmitter {
    node: Arc<dyn LocalNode>,
}

impl NodeSubmitter {
    pub fn new(node: Arc<dyn LocalNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl BlockSubmitter for NodeSubmitter {
    async fn submit(&self, candidate: &BlockCandidate) -> Result<SubmitAccepted, SubmitRejected> {
        self.node.submit_block(candidate).await
    }
}
