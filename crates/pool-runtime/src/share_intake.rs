//! # Share Intake
//!
//! The relay's entry point for the Stratum layer. Every call is a local
//! decision plus a non-blocking `emit`; only block candidates wait, and only
//! for the submission race.
//!
//! ```text
//! miner share ──► check_share (WorkView) ──► ShareSubmitted event
//!                       │
//!                       └─ meets network target ──► DualSubmissionRace
//!                                                    └─► BlockFound event
//! ```

use parking_lot::Mutex;
use rp_02_template_sync::{ShareSubmission, ShareVerdict, WorkView};
use rp_04_block_submission::{DualSubmissionRace, RaceOutcome, SubmissionError};
use shared_types::{
    display_hash, BlockCandidate, BlockHeader, EventEmitter, MiningEventPayload, RelayId,
    TemplateId, TimeSource,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const COMPONENT: &str = "share_intake";

/// Why a block candidate was not raced.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Template {0} is neither current nor inside the grace window")]
    UnknownTemplate(TemplateId),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// A solved header from a miner.
#[derive(Debug, Clone)]
pub struct SolvedBlock {
    pub worker: String,
    pub template: TemplateId,
    pub header: BlockHeader,
    pub block_data: Vec<u8>,
}

/// Facade the share layer calls into.
#[derive(Clone)]
pub struct ShareIntake {
    relay_id: RelayId,
    work: WorkView,
    race: DualSubmissionRace,
    events: Arc<dyn EventEmitter>,
    time: Arc<dyn TimeSource>,
    best: Arc<Mutex<HashMap<String, f64>>>,
}

impl ShareIntake {
    pub fn new(
        relay_id: RelayId,
        work: WorkView,
        race: DualSubmissionRace,
        events: Arc<dyn EventEmitter>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            relay_id,
            work,
            race,
            events,
            time,
            best: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current work for miners.
    pub fn work(&self) -> &WorkView {
        &self.work
    }

    /// Validate a share against active work and record it.
    pub fn on_share(&self, share: &ShareSubmission) -> ShareVerdict {
        let verdict = self.work.check_share(share);
        let accepted = verdict.is_accepted();

        self.events.emit(MiningEventPayload::ShareSubmitted {
            worker: share.worker.clone(),
            template: share.template,
            difficulty: share.difficulty,
            accepted,
        });

        if accepted && self.raise_best(&share.worker, share.difficulty) {
            self.events.emit(MiningEventPayload::BestDifficulty {
                worker: share.worker.clone(),
                difficulty: share.difficulty,
            });
        }
        verdict
    }

    /// Race a share that meets the network target through both submission
    /// paths.
    ///
    /// # Errors
    ///
    /// - `UnknownTemplate` when the template has left the grace window
    /// - `Submission` when the race itself fails
    pub async fn on_block_candidate(
        &self,
        solved: SolvedBlock,
    ) -> Result<RaceOutcome, IntakeError> {
        let template = self
            .work
            .template_for(solved.template)
            .ok_or(IntakeError::UnknownTemplate(solved.template))?;

        let candidate = BlockCandidate {
            header: solved.header,
            block_data: solved.block_data,
            relay_id: self.relay_id.clone(),
            worker: solved.worker,
            template: solved.template,
            height: template.height,
            discovered_at_ms: self.time.now_ms(),
        };

        info!(
            component = COMPONENT,
            block_hash = %display_hash(&candidate.block_hash()),
            height = candidate.height,
            template = %candidate.template,
            worker = %candidate.worker,
            "Block candidate found"
        );
        Ok(self.race.on_block_candidate(candidate).await?)
    }

    pub fn miner_connected(&self, worker: &str, remote_addr: Option<String>) {
        self.events.emit(MiningEventPayload::MinerConnected {
            worker: worker.to_string(),
            remote_addr,
        });
    }

    pub fn miner_disconnected(&self, worker: &str, reason: &str) {
        self.best.lock().remove(worker);
        self.events.emit(MiningEventPayload::MinerDisconnected {
            worker: worker.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn difficulty_updated(&self, worker: &str, difficulty: f64) {
        self.events.emit(MiningEventPayload::DifficultyUpdated {
            worker: worker.to_string(),
            difficulty,
        });
    }

    pub fn hashrate_updated(&self, worker: &str, hashrate_hs: f64) {
        self.events.emit(MiningEventPayload::HashrateUpdated {
            worker: worker.to_string(),
            hashrate_hs,
        });
    }

    /// Returns `true` if `difficulty` is a new best for `worker`.
    fn raise_best(&self, worker: &str, difficulty: f64) -> bool {
        let mut best = self.best.lock();
        match best.get_mut(worker) {
            Some(current) if *current >= difficulty => false,
            Some(current) => {
                *current = difficulty;
                true
            }
            None => {
                best.insert(worker.to_string(), difficulty);
                true
            }
        }
    }
}

/// Emit a `NetworkBlock` event whenever active work moves to a new height.
pub async fn watch_network_blocks(
    mut work: WorkView,
    events: Arc<dyn EventEmitter>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_height = work.current().map(|(_, template)| template.height);

    loop {
        tokio::select! {
            changed = work.changed() => {
                let Some(active) = changed else {
                    debug!(component = COMPONENT, "Work view closed");
                    break;
                };
                let height = active.template.height;
                if last_height.is_some_and(|last| last >= height) {
                    continue;
                }
                last_height = Some(height);
                // The template builds on the new tip, one below its height.
                events.emit(MiningEventPayload::NetworkBlock {
                    height: height.saturating_sub(1),
                    block_hash: display_hash(&active.template.prev_block_hash),
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    if last_height.is_none() {
        warn!(component = COMPONENT, "Network block watcher stopped before any work arrived");
    }
}
