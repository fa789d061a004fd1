//! # Time-Bounded Dedup Window
//!
//! Remembers publish dedup keys for a bounded window so that a publisher
//! retrying after a lost acknowledgement does not store the same message
//! twice.
//!
//! ## Design
//!
//! - Keys are remembered with the time they were first seen and the
//!   sequence they were stored under.
//! - Keys are garbage-collected once older than the window; the GC runs at
//!   most once per `gc_interval_ms`.
//! - Time is passed in by the caller, so the window is deterministic under
//!   test.

use std::collections::HashMap;

/// Time-bounded map of dedup key → stored sequence.
#[derive(Debug)]
pub struct TimeBoundedDedupWindow {
    /// Map of key -> (first seen ms, stored sequence).
    seen: HashMap<String, (u64, u64)>,

    /// Window length in milliseconds.
    window_ms: u64,

    /// Last garbage collection timestamp.
    last_gc_ms: u64,

    /// Garbage collection interval in milliseconds.
    gc_interval_ms: u64,
}

impl TimeBoundedDedupWindow {
    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL_MS: u64 = 10_000;

    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self::with_config(window_ms, Self::DEFAULT_GC_INTERVAL_MS)
    }

    #[must_use]
    pub fn with_config(window_ms: u64, gc_interval_ms: u64) -> Self {
        Self {
            seen: HashMap::new(),
            window_ms,
            last_gc_ms: 0,
            gc_interval_ms,
        }
    }

    /// Look up `key`; returns the sequence it was stored under if it is
    /// still inside the window.
    pub fn check(&mut self, key: &str, now_ms: u64) -> Option<u64> {
        if now_ms.saturating_sub(self.last_gc_ms) > self.gc_interval_ms {
            self.garbage_collect(now_ms);
            self.last_gc_ms = now_ms;
        }

        match self.seen.get(key) {
            Some(&(first_seen, sequence)) if !self.expired(first_seen, now_ms) => Some(sequence),
            _ => None,
        }
    }

    /// Remember `key` as stored under `sequence`.
    pub fn record(&mut self, key: &str, sequence: u64, now_ms: u64) {
        self.seen.insert(key.to_string(), (now_ms, sequence));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn expired(&self, first_seen: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(first_seen) >= self.window_ms
    }

    fn garbage_collect(&mut self, now_ms: u64) {
        let window = self.window_ms;
        self.seen
            .retain(|_, &mut (first_seen, _)| now_ms.saturating_sub(first_seen) < window);
    }
}
