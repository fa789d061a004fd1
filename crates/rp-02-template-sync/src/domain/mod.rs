//! Domain layer: immutable work snapshots and share verdicts.

mod share;
mod work;

pub use share::{ShareSubmission, ShareVerdict};
pub use work::{ActiveWork, RetainedTemplate};
