//! In-memory ingest store for tests and single-process deployments.

use super::IngestStore;
use crate::error::Result;
use parking_lot::Mutex;
use shared_types::{EventId, MiningEvent};
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    events: HashMap<EventId, MiningEvent>,
    markers: HashMap<EventId, u64>,
}

/// [`IngestStore`] over a mutex-guarded map. One lock covers the whole
/// commit, which makes it atomic.
#[derive(Default)]
pub struct InMemoryIngestStore {
    inner: Mutex<Inner>,
}

impl InMemoryIngestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows sorted by event ID.
    pub fn events(&self) -> Vec<MiningEvent> {
        let mut events: Vec<_> = self.inner.lock().events.values().cloned().collect();
        events.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        events
    }

    pub fn marker_count(&self) -> usize {
        self.inner.lock().markers.len()
    }
}

impl IngestStore for InMemoryIngestStore {
    fn has_marker(&self, event_id: &EventId) -> Result<bool> {
        Ok(self.inner.lock().markers.contains_key(event_id))
    }

    fn commit(&self, event: &MiningEvent, now_ms: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.events.insert(event.event_id.clone(), event.clone());
        inner.markers.insert(event.event_id.clone(), now_ms);
        Ok(())
    }

    fn evict_markers(&self, cutoff_ms: u64) -> Result<usize> {
        let mut inner = self.inner.lock();
        let before = inner.markers.len();
        inner.markers.retain(|_, seen_at| *seen_at >= cutoff_ms);
        Ok(before - inner.markers.len())
    }

    fn get(&self, event_id: &EventId) -> Result<Option<MiningEvent>> {
        Ok(self.inner.lock().events.get(event_id).cloned())
    }

    fn event_count(&self) -> Result<usize> {
        Ok(self.inner.lock().events.len())
    }
}
