//! Outbound ports (driven side)

use crate::domain::CandidateRecord;
use shared_types::Hash;

/// Port: where raced candidates and their outcomes are kept.
///
/// `record` is an upsert keyed by block hash: the race writes once when the
/// verdict is known and again when the losing path reports.
pub trait CandidateArchive: Send + Sync {
    fn record(&self, record: CandidateRecord);

    fn get(&self, block_hash: &Hash) -> Option<CandidateRecord>;
}
