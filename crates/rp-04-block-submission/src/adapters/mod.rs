//! Adapters

mod memory_archive;

pub use memory_archive::InMemoryCandidateArchive;
