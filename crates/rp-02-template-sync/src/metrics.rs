//! Metrics collection for template sync

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for template sync
#[derive(Debug, Default)]
pub struct Metrics {
    /// Templates installed as current work
    pub templates_applied: AtomicU64,

    /// Templates discarded as stale or malformed
    pub templates_discarded: AtomicU64,

    /// Authority switches (failover transitions)
    pub authority_switches: AtomicU64,

    /// Shares judged against current or retained work
    pub shares_accepted: AtomicU64,

    /// Shares for unknown or expired work
    pub shares_stale: AtomicU64,

    /// Shares the share layer reported below target
    pub shares_invalid: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub templates_applied: u64,
    pub templates_discarded: u64,
    pub authority_switches: u64,
    pub shares_accepted: u64,
    pub shares_stale: u64,
    pub shares_invalid: u64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            templates_applied: self.templates_applied.load(Ordering::Relaxed),
            templates_discarded: self.templates_discarded.load(Ordering::Relaxed),
            authority_switches: self.authority_switches.load(Ordering::Relaxed),
            shares_accepted: self.shares_accepted.load(Ordering::Relaxed),
            shares_stale: self.shares_stale.load(Ordering::Relaxed),
            shares_invalid: self.shares_invalid.load(Ordering::Relaxed),
        }
    }
}
