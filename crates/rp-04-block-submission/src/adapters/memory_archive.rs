//! Bounded in-memory candidate archive.

use crate::domain::CandidateRecord;
use crate::ports::CandidateArchive;
use parking_lot::Mutex;
use shared_types::Hash;
use std::collections::{HashMap, VecDeque};

/// Keeps the most recent `capacity` candidates.
pub struct InMemoryCandidateArchive {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<Hash, CandidateRecord>,
    order: VecDeque<Hash>,
}

impl InMemoryCandidateArchive {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<CandidateRecord> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|hash| inner.records.get(hash).cloned())
            .collect()
    }
}

impl Default for InMemoryCandidateArchive {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl CandidateArchive for InMemoryCandidateArchive {
    fn record(&self, record: CandidateRecord) {
        let mut inner = self.inner.lock();
        let hash = record.block_hash;
        if inner.records.insert(hash, record).is_none() {
            inner.order.push_back(hash);
            while inner.order.len() > self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.records.remove(&oldest);
                }
            }
        }
    }

    fn get(&self, block_hash: &Hash) -> Option<CandidateRecord> {
        self.inner.lock().records.get(block_hash).cloned()
    }
}
