//! Relay registration and health evaluation.

use shared_types::{HealthState, Region, RelayId};
use std::time::Duration;
use tokio::time::Instant;

/// Heartbeat thresholds.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub heartbeat_interval: Duration,
    pub degraded_after_missed: u32,
    pub unreachable_after_missed: u32,
}

impl HealthPolicy {
    /// Whole heartbeat intervals elapsed since `last_heartbeat`.
    pub fn missed_heartbeats(&self, last_heartbeat: Instant, now: Instant) -> u32 {
        let interval = self.heartbeat_interval.as_millis().max(1);
        let elapsed = now.saturating_duration_since(last_heartbeat).as_millis();
        u32::try_from(elapsed / interval).unwrap_or(u32::MAX)
    }

    /// Health for a given number of consecutive misses.
    pub fn health_for(&self, missed: u32) -> HealthState {
        if missed >= self.unreachable_after_missed {
            HealthState::Unreachable
        } else if missed >= self.degraded_after_missed {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }
}

/// Primary-side record of one connected relay.
#[derive(Debug, Clone)]
pub struct RelayRegistration {
    pub relay_id: RelayId,
    pub region: Region,
    pub connection_id: u64,
    pub authenticated: bool,
    pub last_heartbeat: Instant,
    pub missed_heartbeats: u32,
    pub health: HealthState,
    pub connected_at: Instant,
}

impl RelayRegistration {
    /// A freshly authenticated relay is healthy.
    pub fn new(relay_id: RelayId, region: Region, connection_id: u64, now: Instant) -> Self {
        Self {
            relay_id,
            region,
            connection_id,
            authenticated: true,
            last_heartbeat: now,
            missed_heartbeats: 0,
            health: HealthState::Healthy,
            connected_at: now,
        }
    }

    /// Record a heartbeat. Ignored once unreachable: only a new,
    /// re-authenticated connection restores an unreachable relay.
    pub fn record_heartbeat(&mut self, now: Instant) -> Option<HealthState> {
        if self.health == HealthState::Unreachable {
            return None;
        }
        self.last_heartbeat = now;
        self.missed_heartbeats = 0;
        self.transition(HealthState::Healthy)
    }

    /// Re-evaluate health at `now`. Returns the new state on a transition.
    pub fn evaluate(&mut self, policy: &HealthPolicy, now: Instant) -> Option<HealthState> {
        if self.health == HealthState::Unreachable {
            return None;
        }
        self.missed_heartbeats = policy.missed_heartbeats(self.last_heartbeat, now);
        self.transition(policy.health_for(self.missed_heartbeats))
    }

    fn transition(&mut self, next: HealthState) -> Option<HealthState> {
        if next == self.health {
            return None;
        }
        self.health = next;
        Some(next)
    }
}

/// Operator-facing view of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    pub relay_id: RelayId,
    pub region: Region,
    pub authenticated: bool,
    pub health: HealthState,
    pub missed_heartbeats: u32,
    pub acked_sequence: u64,
    pub last_sent_sequence: Option<u64>,
    pub pending_templates: usize,
}
