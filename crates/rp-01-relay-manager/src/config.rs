//! Configuration for the relay connection manager

use std::time::Duration;

/// Relay connection manager configuration
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Expected heartbeat interval of each relay
    pub heartbeat_interval: Duration,

    /// Consecutive missed heartbeats before `healthy` → `degraded`
    pub degraded_after_missed: u32,

    /// Consecutive missed heartbeats before `degraded` → `unreachable`
    pub unreachable_after_missed: u32,

    /// First retry delay after a relay's outbound queue is full
    pub initial_backoff: Duration,

    /// Retry delay cap
    pub max_backoff: Duration,

    /// Time without an ack for the latest template before it is resent
    pub ack_timeout: Duration,

    /// Frames buffered per relay connection
    pub outbound_queue: usize,

    /// Templates kept per relay while its queue is full
    pub max_pending_templates: usize,

    /// Deadline for the Hello / AuthResponse exchange
    pub handshake_timeout: Duration,

    /// Manager housekeeping period (health checks, retries, resends)
    pub tick_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            degraded_after_missed: 3,
            unreachable_after_missed: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(4),
            outbound_queue: 64,
            max_pending_templates: 16,
            handshake_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl ManagerConfig {
    /// Health thresholds derived from this configuration.
    pub fn health_policy(&self) -> crate::domain::HealthPolicy {
        crate::domain::HealthPolicy {
            heartbeat_interval: self.heartbeat_interval,
            degraded_after_missed: self.degraded_after_missed,
            unreachable_after_missed: self.unreachable_after_missed,
        }
    }
}
