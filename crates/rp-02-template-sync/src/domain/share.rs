//! Share judgement inputs and outputs.

use shared_types::TemplateId;

/// A share as reported by the share layer.
///
/// Difficulty math happens upstream; `meets_share_target` carries its
/// result.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareSubmission {
    pub worker: String,
    pub template: TemplateId,
    pub difficulty: f64,
    pub meets_share_target: bool,
}

/// Verdict for a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareVerdict {
    /// Mined on current work or on work still inside the grace window.
    Accepted,
    /// Work unknown or expired.
    Stale,
    /// Below the share target.
    Invalid,
}

impl ShareVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ShareVerdict::Accepted)
    }
}
