//! Per-relay delivery bookkeeping: what was sent, what was acknowledged,
//! and when the latest template must be resent in full.

use std::time::Duration;
use tokio::time::Instant;

/// Result of recording an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The acknowledged sequence moved forward.
    Advanced,
    /// At or below what was already acknowledged.
    Stale,
    /// Acknowledges a sequence that was never sent.
    Unknown,
}

/// Tracks sent and acknowledged sequences for one relay.
#[derive(Debug, Clone, Default)]
pub struct DeliveryTracker {
    acked: u64,
    last_sent: Option<(u64, Instant)>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acked_sequence(&self) -> u64 {
        self.acked
    }

    pub fn last_sent_sequence(&self) -> Option<u64> {
        self.last_sent.map(|(seq, _)| seq)
    }

    pub fn record_sent(&mut self, sequence: u64, now: Instant) {
        self.last_sent = Some((sequence, now));
    }

    pub fn record_ack(&mut self, sequence: u64) -> AckOutcome {
        match self.last_sent {
            Some((sent, _)) if sequence > sent => AckOutcome::Unknown,
            None => AckOutcome::Unknown,
            _ if sequence <= self.acked => AckOutcome::Stale,
            _ => {
                self.acked = sequence;
                AckOutcome::Advanced
            }
        }
    }

    /// The relay has not acknowledged the latest sent template within
    /// `ack_timeout`: there is a gap between what it has and what it should
    /// have.
    pub fn needs_resend(&self, now: Instant, ack_timeout: Duration) -> bool {
        match self.last_sent {
            Some((sent, at)) => sent > self.acked && now.saturating_duration_since(at) >= ack_timeout,
            None => false,
        }
    }
}
