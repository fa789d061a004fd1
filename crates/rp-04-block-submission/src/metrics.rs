//! Metrics collection for block submission

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for the dual submission race
#[derive(Debug, Default)]
pub struct Metrics {
    /// Candidates raced
    pub candidates: AtomicU64,

    /// Races won by the local node
    pub won_local: AtomicU64,

    /// Races won by the primary
    pub won_remote: AtomicU64,

    /// Candidates rejected on both paths
    pub rejected: AtomicU64,

    /// Loser results recorded after a winner
    pub redundant_results: AtomicU64,

    /// Repeat calls for an already confirmed block
    pub duplicate_candidates: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub candidates: u64,
    pub won_local: u64,
    pub won_remote: u64,
    pub rejected: u64,
    pub redundant_results: u64,
    pub duplicate_candidates: u64,
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
            candidates: self.candidates.load(Ordering::Relaxed),
            won_local: self.won_local.load(Ordering::Relaxed),
            won_remote: self.won_remote.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            redundant_results: self.redundant_results.load(Ordering::Relaxed),
            duplicate_candidates: self.duplicate_candidates.load(Ordering::Relaxed),
        }
    }
}
