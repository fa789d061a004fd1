//! Events emitted by the template channel client.

use shared_types::BlockTemplate;

/// What the relay observed on its template channel.
///
/// Consumed by the failover controller, which owns every decision about
/// them.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Handshake completed.
    Connected,
    /// Session ended; a reconnect is under way.
    Disconnected { reason: String },
    /// Template pushed by the primary.
    Template(BlockTemplate),
    /// Primary answered a heartbeat.
    HeartbeatAcked,
    /// A heartbeat went unanswered for a full interval.
    HeartbeatMissed,
    /// Primary refused our credential.
    AuthRejected { reason: String },
}

impl ChannelEvent {
    /// Events that prove the primary is alive.
    pub fn is_primary_activity(&self) -> bool {
        matches!(
            self,
            ChannelEvent::Connected | ChannelEvent::Template(_) | ChannelEvent::HeartbeatAcked
        )
    }
}
