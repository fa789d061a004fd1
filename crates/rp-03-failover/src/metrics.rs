//! Metrics collection for the failover controller

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for the failover controller
#[derive(Debug, Default)]
pub struct Metrics {
    /// Following → independent transitions
    pub went_independent: AtomicU64,

    /// Independent → following transitions
    pub resumed_following: AtomicU64,

    /// Primary templates handed to the applier
    pub primary_templates: AtomicU64,

    /// Primary templates ignored while independent (not fresh)
    pub primary_templates_ignored: AtomicU64,

    /// Local templates installed
    pub local_templates: AtomicU64,

    /// Failed local node polls
    pub local_node_failures: AtomicU64,

    /// Heartbeats the primary left unanswered
    pub heartbeats_missed: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub went_independent: u64,
    pub resumed_following: u64,
    pub primary_templates: u64,
    pub primary_templates_ignored: u64,
    pub local_templates: u64,
    pub local_node_failures: u64,
    pub heartbeats_missed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            went_independent: self.went_independent.load(Ordering::Relaxed),
            resumed_following: self.resumed_following.load(Ordering::Relaxed),
            primary_templates: self.primary_templates.load(Ordering::Relaxed),
            primary_templates_ignored: self.primary_templates_ignored.load(Ordering::Relaxed),
            local_templates: self.local_templates.load(Ordering::Relaxed),
            local_node_failures: self.local_node_failures.load(Ordering::Relaxed),
            heartbeats_missed: self.heartbeats_missed.load(Ordering::Relaxed),
        }
    }
}
