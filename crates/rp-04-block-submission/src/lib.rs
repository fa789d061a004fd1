//! # Dual Submission Race
//!
//! Every block candidate is submitted twice, concurrently: through the
//! relay's own node and through the primary over the template channel.
//!
//! ```text
//!                  ┌── local node  (timeout 5s) ──┐
//!  candidate ──────┤                              ├──→ first acceptance wins
//!                  └── primary     (timeout 5s) ──┘
//! ```
//!
//! ## Guarantees
//!
//! - The caller resolves at the first confirmed acceptance, or once both
//!   paths have definitively failed.
//! - The losing path is never cancelled. A detached finisher records its
//!   result as redundant.
//! - Exactly one `BlockFound` event per confirmed block hash, however many
//!   paths succeed and however often the candidate is raced.
//! - Both paths failing marks the candidate rejected and logs at error.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

mod config;
mod error;
mod metrics;

pub use adapters::InMemoryCandidateArchive;
pub use config::RaceConfig;
pub use domain::{CandidateRecord, CandidateVerdict, PathReport, RaceOutcome, RaceStep, RaceTally};
pub use error::{Result, SubmissionError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ports::CandidateArchive;
pub use service::DualSubmissionRace;
