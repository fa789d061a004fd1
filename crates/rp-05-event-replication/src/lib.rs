//! # Event Replication
//!
//! Carries mining events from every region to the central collector.
//!
//! ```text
//!  share layer ──emit──► EventPublisher ──publish──► ReplicationChannel
//!                        (bounded buffer,             │
//!                         send-loop task)             │ durable consumer
//!                                                     ▼
//!                                              EventIngestor ──commit──► IngestStore
//!                                              (dedup by EventId)        (row + marker)
//! ```
//!
//! ## Guarantees
//!
//! - **One Event per Occurrence**: `emit` assigns a fresh `EventId` and never
//!   blocks the caller.
//! - **Order**: per relay, events reach the channel in emission order,
//!   including events buffered through an outage.
//! - **Explicit Loss**: a full buffer drops the incoming event and logs it at
//!   error severity.
//! - **Exactly-Once Persistence**: the ingestor acks only after the event
//!   row and its dedup marker are committed in one batch; duplicates are
//!   acked and discarded.
//! - **Restart Safety**: the channel's retained messages and the consumer's
//!   ack floor live in a `ChannelLog` (the RocksDB store implements one), so
//!   events a failing store nak'd are redelivered after a collector restart.

pub mod ingestor;
pub mod publisher;
pub mod store;

mod config;
mod error;
mod metrics;

pub use config::{IngestorConfig, PublisherConfig};
pub use error::{ReplicationError, Result};
pub use ingestor::{EventIngestor, IngestOutcome};
pub use metrics::{IngestorStats, IngestorStatsSnapshot, PublisherStats, PublisherStatsSnapshot};
pub use publisher::EventPublisher;
pub use store::{IngestStore, InMemoryIngestStore};

#[cfg(feature = "rocksdb")]
pub use store::{RocksDbIngestStore, RocksDbStoreConfig};
