//! Metrics collection for the relay connection manager

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for the relay connection manager
#[derive(Debug, Default)]
pub struct Metrics {
    /// Successful relay registrations
    pub relays_registered: AtomicU64,

    /// Failed authentication attempts
    pub auth_failures: AtomicU64,

    /// Templates accepted for broadcast
    pub templates_broadcast: AtomicU64,

    /// Template frames queued to relays
    pub deliveries: AtomicU64,

    /// Deliveries deferred because a relay queue was full
    pub delivery_retries: AtomicU64,

    /// Full-template resends after a missing ack
    pub resends: AtomicU64,

    /// Relays evicted as unreachable
    pub evictions: AtomicU64,

    /// Block submissions forwarded by relays
    pub submissions_forwarded: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub relays_registered: u64,
    pub auth_failures: u64,
    pub templates_broadcast: u64,
    pub deliveries: u64,
    pub delivery_retries: u64,
    pub resends: u64,
    pub evictions: u64,
    pub submissions_forwarded: u64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            relays_registered: self.relays_registered.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            templates_broadcast: self.templates_broadcast.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_retries: self.delivery_retries.load(Ordering::Relaxed),
            resends: self.resends.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            submissions_forwarded: self.submissions_forwarded.load(Ordering::Relaxed),
        }
    }
}
