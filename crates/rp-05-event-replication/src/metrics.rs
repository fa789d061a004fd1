//! Counters for the publisher and the ingestor

use std::sync::atomic::{AtomicU64, Ordering};

fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Publisher counters
#[derive(Debug, Default)]
pub struct PublisherStats {
    /// Events accepted by `emit`
    pub emitted: AtomicU64,

    /// Events acknowledged by the channel
    pub published: AtomicU64,

    /// Events lost (buffer full, encode failure or channel rejection)
    pub dropped: AtomicU64,

    /// Failed publish attempts that were retried
    pub retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStatsSnapshot {
    pub emitted: u64,
    pub published: u64,
    pub dropped: u64,
    pub retries: u64,
}

impl PublisherStats {
    pub fn incr(counter: &AtomicU64) {
        incr(counter)
    }

    pub fn snapshot(&self) -> PublisherStatsSnapshot {
        PublisherStatsSnapshot {
            emitted: self.emitted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Ingestor counters
#[derive(Debug, Default)]
pub struct IngestorStats {
    /// Events persisted
    pub processed: AtomicU64,

    /// Duplicates acked and discarded
    pub duplicates: AtomicU64,

    /// Undecodable messages acked and discarded
    pub decode_failures: AtomicU64,

    /// Persistence failures (nak'd for redelivery)
    pub persist_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestorStatsSnapshot {
    pub processed: u64,
    pub duplicates: u64,
    pub decode_failures: u64,
    pub persist_failures: u64,
}

impl IngestorStats {
    pub fn incr(counter: &AtomicU64) {
        incr(counter)
    }

    pub fn snapshot(&self) -> IngestorStatsSnapshot {
        IngestorStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}
