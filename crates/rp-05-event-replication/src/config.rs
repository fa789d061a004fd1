//! Configuration for event replication

use shared_types::{Region, RelayId};
use std::time::Duration;

/// Regional publisher configuration
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// Relay identity, first component of every event ID
    pub relay_id: RelayId,

    /// Region tag stamped on every event
    pub region: Region,

    /// Events held while the channel is unavailable
    pub buffer_capacity: usize,

    /// First retry delay after a failed publish
    pub initial_backoff: Duration,

    /// Retry delay cap
    pub max_backoff: Duration,
}

impl PublisherConfig {
    pub fn new(relay_id: RelayId, region: Region) -> Self {
        Self {
            relay_id,
            region,
            buffer_capacity: 100_000,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Central ingestor configuration
#[derive(Clone, Debug)]
pub struct IngestorConfig {
    /// Durable consumer name on the channel
    pub durable_name: String,

    /// Subject filter for the consumer
    pub subject_filter: String,

    /// Deliveries fetched per round
    pub batch_size: usize,

    /// Longest wait for the first delivery of a round
    pub fetch_wait: Duration,

    /// How long dedup markers are kept
    pub dedup_window: Duration,

    /// How often expired dedup markers are evicted
    pub marker_gc_interval: Duration,

    /// Pause after the channel reports an error
    pub error_backoff: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            durable_name: "collector".to_string(),
            subject_filter: "events.>".to_string(),
            batch_size: 256,
            fetch_wait: Duration::from_secs(1),
            dedup_window: Duration::from_secs(48 * 60 * 60),
            marker_gc_interval: Duration::from_secs(10 * 60),
            error_backoff: Duration::from_secs(1),
        }
    }
}
