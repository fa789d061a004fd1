//! # Channel Log
//!
//! Durable backing for a retaining channel: the retained messages and each
//! durable consumer's ack floor. A channel rebuilt from the same log after a
//! restart still holds every message that was not evicted, and each
//! consumer resumes just past its floor.
//!
//! ## Ack Floor
//!
//! The highest sequence at or below which a consumer has nothing left to
//! settle. It only moves when every earlier delivery is acked, so an
//! acked-but-out-of-order sequence never hides an unacked one below it.

use crate::channel::{ChannelError, StoredMessage};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Port: persistence behind `InMemoryReplicationChannel::with_log`.
pub trait ChannelLog: Send + Sync {
    /// Persist a message before it is acknowledged to the publisher.
    fn append(&self, message: &StoredMessage) -> Result<(), ChannelError>;

    /// All persisted messages in sequence order.
    fn load(&self) -> Result<Vec<StoredMessage>, ChannelError>;

    /// Drop messages with a sequence at or below `sequence`.
    fn remove_through(&self, sequence: u64) -> Result<(), ChannelError>;

    /// Record the ack floor of `consumer`.
    fn save_ack_floor(&self, consumer: &str, sequence: u64) -> Result<(), ChannelError>;

    /// Every recorded ack floor.
    fn ack_floors(&self) -> Result<Vec<(String, u64)>, ChannelError>;
}

#[derive(Default)]
struct LogInner {
    messages: BTreeMap<u64, StoredMessage>,
    floors: HashMap<String, u64>,
}

/// [`ChannelLog`] kept in process memory. Outlives a channel instance, so
/// tests and single-process deployments can restart a channel over it.
#[derive(Default)]
pub struct InMemoryChannelLog {
    inner: Mutex<LogInner>,
}

impl InMemoryChannelLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChannelLog for InMemoryChannelLog {
    fn append(&self, message: &StoredMessage) -> Result<(), ChannelError> {
        self.inner
            .lock()
            .messages
            .insert(message.sequence, message.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<StoredMessage>, ChannelError> {
        Ok(self.inner.lock().messages.values().cloned().collect())
    }

    fn remove_through(&self, sequence: u64) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        let kept = inner.messages.split_off(&sequence.saturating_add(1));
        inner.messages = kept;
        Ok(())
    }

    fn save_ack_floor(&self, consumer: &str, sequence: u64) -> Result<(), ChannelError> {
        self.inner.lock().floors.insert(consumer.to_string(), sequence);
        Ok(())
    }

    fn ack_floors(&self) -> Result<Vec<(String, u64)>, ChannelError> {
        Ok(self
            .inner
            .lock()
            .floors
            .iter()
            .map(|(name, floor)| (name.clone(), *floor))
            .collect())
    }
}
