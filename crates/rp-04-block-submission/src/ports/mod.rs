//! Ports

mod outbound;

pub use outbound::CandidateArchive;
