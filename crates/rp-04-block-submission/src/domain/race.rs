//! Race tally
//!
//! ```text
//!  observe(report)
//!    ├── no winner yet, accepted        → Won(path)
//!    ├── no winner yet, failed, 1 of 2  → Pending
//!    ├── no winner yet, failed, 2 of 2  → BothFailed
//!    └── winner already set             → Finished (report marked redundant)
//! ```

use shared_types::{BlockCandidate, Hash, SubmissionPath, SubmitAccepted, SubmitRejected};
use std::time::Duration;

/// Result of one submission path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathReport {
    pub path: SubmissionPath,
    pub result: Result<SubmitAccepted, SubmitRejected>,
    pub elapsed: Duration,
    /// Completed after the other path had already won.
    pub redundant: bool,
}

impl PathReport {
    pub fn new(
        path: SubmissionPath,
        result: Result<SubmitAccepted, SubmitRejected>,
        elapsed: Duration,
    ) -> Self {
        Self {
            path,
            result,
            elapsed,
            redundant: false,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result.is_ok()
    }
}

/// Final or interim judgement of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateVerdict {
    Pending,
    Confirmed { winner: SubmissionPath },
    Rejected,
}

/// Archived candidate with both path outcomes and the winner annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub block_hash: Hash,
    pub candidate: BlockCandidate,
    pub local: Option<PathReport>,
    pub remote: Option<PathReport>,
    pub verdict: CandidateVerdict,
}

impl CandidateRecord {
    pub fn new(candidate: BlockCandidate) -> Self {
        Self {
            block_hash: candidate.block_hash(),
            candidate,
            local: None,
            remote: None,
            verdict: CandidateVerdict::Pending,
        }
    }

    pub fn winner(&self) -> Option<SubmissionPath> {
        match self.verdict {
            CandidateVerdict::Confirmed { winner } => Some(winner),
            _ => None,
        }
    }

    pub fn report(&self, path: SubmissionPath) -> Option<&PathReport> {
        match path {
            SubmissionPath::Local => self.local.as_ref(),
            SubmissionPath::Remote => self.remote.as_ref(),
        }
    }

    fn slot(&mut self, path: SubmissionPath) -> &mut Option<PathReport> {
        match path {
            SubmissionPath::Local => &mut self.local,
            SubmissionPath::Remote => &mut self.remote,
        }
    }
}

/// Step reported after each observed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceStep {
    Pending,
    Won(SubmissionPath),
    BothFailed,
    Finished,
}

/// What the caller of a race gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceOutcome {
    /// This call confirmed the block.
    Won {
        winner: SubmissionPath,
        block_hash: Hash,
    },
    /// The block was confirmed by an earlier call; nothing was submitted.
    AlreadyConfirmed {
        winner: SubmissionPath,
        block_hash: Hash,
    },
}

impl RaceOutcome {
    pub fn winner(&self) -> SubmissionPath {
        match self {
            RaceOutcome::Won { winner, .. } | RaceOutcome::AlreadyConfirmed { winner, .. } => {
                *winner
            }
        }
    }
}

/// Folds path reports into a [`CandidateRecord`].
#[derive(Debug, Clone)]
pub struct RaceTally {
    record: CandidateRecord,
}

impl RaceTally {
    pub fn new(candidate: BlockCandidate) -> Self {
        Self {
            record: CandidateRecord::new(candidate),
        }
    }

    pub fn record(&self) -> &CandidateRecord {
        &self.record
    }

    /// Paths that have not reported yet.
    pub fn outstanding(&self) -> Vec<SubmissionPath> {
        [SubmissionPath::Local, SubmissionPath::Remote]
            .into_iter()
            .filter(|path| self.record.report(*path).is_none())
            .collect()
    }

    pub fn observe(&mut self, mut report: PathReport) -> RaceStep {
        let path = report.path;
        if self.record.report(path).is_some() {
            return RaceStep::Finished;
        }

        let had_winner = self.record.winner().is_some();
        report.redundant = had_winner;
        let accepted = report.is_accepted();
        *self.record.slot(path) = Some(report);
        let done = self.outstanding().is_empty();

        if had_winner {
            return RaceStep::Finished;
        }
        if accepted {
            self.record.verdict = CandidateVerdict::Confirmed { winner: path };
            return RaceStep::Won(path);
        }
        if done {
            self.record.verdict = CandidateVerdict::Rejected;
            return RaceStep::BothFailed;
        }
        RaceStep::Pending
    }
}
