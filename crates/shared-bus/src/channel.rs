//! # Replication Channel Ports
//!
//! The publish side and the durable-consumer side of the channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelError {
    /// The channel cannot be reached right now. Retry later.
    #[error("Replication channel unavailable: {0}")]
    Unavailable(String),

    /// The channel refused the request.
    #[error("Replication channel rejected request: {0}")]
    Rejected(String),

    /// The channel has been shut down.
    #[error("Replication channel closed")]
    Closed,
}

impl ChannelError {
    /// Transient errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_))
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishAck {
    /// Stored under a new sequence.
    Stored { sequence: u64 },
    /// The dedup key was seen inside the dedup window; nothing was stored.
    Duplicate { sequence: u64 },
}

impl PublishAck {
    pub fn sequence(&self) -> u64 {
        match self {
            PublishAck::Stored { sequence } | PublishAck::Duplicate { sequence } => *sequence,
        }
    }
}

/// A message as retained by the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub sequence: u64,
    pub subject: String,
    pub dedup_key: String,
    pub payload: Vec<u8>,
}

/// A message handed to a durable consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: StoredMessage,
    /// 1 on first delivery, incremented on each redelivery.
    pub delivery_count: u32,
}

impl Delivery {
    pub fn sequence(&self) -> u64 {
        self.message.sequence
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub stored: u64,
    pub duplicates_dropped: u64,
    pub evicted: u64,
    pub redeliveries: u64,
}

/// Publish side.
#[async_trait]
pub trait ReplicationChannel: Send + Sync {
    /// Publish `payload` under `subject`.
    ///
    /// An `Ok` return means the channel has durably accepted the message
    /// (or already holds it under the same dedup key).
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        dedup_key: &str,
    ) -> Result<PublishAck, ChannelError>;
}

/// Pull-based durable consumer with manual acknowledgement.
#[async_trait]
pub trait DurableConsumer: Send + Sync {
    /// Fetch up to `max` deliveries, waiting at most `wait` for the first.
    /// An empty vector means nothing arrived in time.
    async fn fetch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, ChannelError>;

    /// Acknowledge a delivery; it will not be delivered again.
    async fn ack(&self, sequence: u64) -> Result<(), ChannelError>;

    /// Negatively acknowledge a delivery; it becomes eligible for
    /// redelivery immediately.
    async fn nak(&self, sequence: u64) -> Result<(), ChannelError>;
}
