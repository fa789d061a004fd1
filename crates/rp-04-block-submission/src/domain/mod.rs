//! Race bookkeeping, free of I/O.

mod race;

pub use race::{CandidateRecord, CandidateVerdict, PathReport, RaceOutcome, RaceStep, RaceTally};
