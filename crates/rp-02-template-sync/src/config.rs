//! Configuration for relay-side template sync

use shared_types::{Region, RelayId};
use std::time::Duration;

/// Template applier configuration
#[derive(Clone, Debug)]
pub struct ApplierConfig {
    /// How long a superseded template keeps validating shares
    pub grace_window: Duration,

    /// Upper bound on retained superseded templates
    pub max_retained: usize,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(120),
            max_retained: 64,
        }
    }
}

/// Template channel client configuration
#[derive(Clone, Debug)]
pub struct ChannelClientConfig {
    /// Primary template server address (`host:port`)
    pub primary_addr: String,

    /// This relay's identity
    pub relay_id: RelayId,

    /// This relay's region tag
    pub region: Region,

    /// Heartbeat period
    pub heartbeat_interval: Duration,

    /// Connect + handshake deadline
    pub connect_timeout: Duration,

    /// First reconnect delay
    pub reconnect_initial_backoff: Duration,

    /// Reconnect delay cap
    pub reconnect_max_backoff: Duration,

    /// Frames buffered towards the primary
    pub outbound_queue: usize,
}

impl ChannelClientConfig {
    pub fn new(primary_addr: impl Into<String>, relay_id: RelayId, region: Region) -> Self {
        Self {
            primary_addr: primary_addr.into(),
            relay_id,
            region,
            heartbeat_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(3),
            reconnect_initial_backoff: Duration::from_millis(250),
            reconnect_max_backoff: Duration::from_secs(5),
            outbound_queue: 64,
        }
    }
}
