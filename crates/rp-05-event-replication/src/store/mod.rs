//! # Ingest Store
//!
//! Persistence for the central collector: event rows keyed by `EventId`
//! and their dedup markers. The consumer position is the replication
//! channel's ack floor, kept by a `ChannelLog`.

mod memory;
#[cfg(feature = "rocksdb")]
mod rocks;

pub use memory::InMemoryIngestStore;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksDbIngestStore, RocksDbStoreConfig};

use crate::error::Result;
use shared_types::{EventId, MiningEvent};

/// Port: durable home of ingested events.
pub trait IngestStore: Send + Sync {
    /// Whether a dedup marker exists for `event_id`.
    fn has_marker(&self, event_id: &EventId) -> Result<bool>;

    /// Persist `event` and its dedup marker (stamped `now_ms`) in one
    /// atomic write. Rows are upserts by event ID.
    fn commit(&self, event: &MiningEvent, now_ms: u64) -> Result<()>;

    /// Drop markers stamped before `cutoff_ms`; returns how many went.
    fn evict_markers(&self, cutoff_ms: u64) -> Result<usize>;

    /// Persisted event by ID.
    fn get(&self, event_id: &EventId) -> Result<Option<MiningEvent>>;

    /// Number of persisted rows.
    fn event_count(&self) -> Result<usize>;
}
