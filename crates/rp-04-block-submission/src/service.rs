//! # Dual Submission Race Service

use crate::config::RaceConfig;
use crate::domain::{PathReport, RaceOutcome, RaceStep, RaceTally};
use crate::error::{Result, SubmissionError};
use crate::metrics::Metrics;
use crate::ports::CandidateArchive;
use parking_lot::Mutex;
use pool_telemetry::log_relay_event;
use shared_types::{
    display_hash, BlockCandidate, BlockSubmitter, EventEmitter, Hash, MiningEventPayload,
    SubmissionPath, SubmitRejected,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

const COMPONENT: &str = "submission_race";

/// Block hashes already confirmed, oldest evicted first.
struct ConfirmedBlocks {
    capacity: usize,
    winners: HashMap<Hash, SubmissionPath>,
    order: VecDeque<Hash>,
}

impl ConfirmedBlocks {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            winners: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, hash: &Hash) -> Option<SubmissionPath> {
        self.winners.get(hash).copied()
    }

    fn insert(&mut self, hash: Hash, winner: SubmissionPath) {
        if self.winners.insert(hash, winner).is_none() {
            self.order.push_back(hash);
            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.winners.remove(&oldest);
                }
            }
        }
    }
}

/// Whether a candidate may start a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Start,
    Racing,
    Confirmed(SubmissionPath),
}

/// Confirmed and in-flight hashes behind one lock, so admitting a
/// candidate and confirming a race can never interleave.
struct SubmissionLedger {
    confirmed: ConfirmedBlocks,
    in_flight: HashSet<Hash>,
}

impl SubmissionLedger {
    fn new(capacity: usize) -> Self {
        Self {
            confirmed: ConfirmedBlocks::new(capacity),
            in_flight: HashSet::new(),
        }
    }

    fn admit(&mut self, hash: Hash) -> Admission {
        if let Some(winner) = self.confirmed.get(&hash) {
            return Admission::Confirmed(winner);
        }
        if !self.in_flight.insert(hash) {
            return Admission::Racing;
        }
        Admission::Start
    }

    fn confirm(&mut self, hash: Hash, winner: SubmissionPath) {
        self.confirmed.insert(hash, winner);
        self.in_flight.remove(&hash);
    }

    fn abandon(&mut self, hash: &Hash) {
        self.in_flight.remove(hash);
    }
}

/// Races block candidates through the local node and the primary.
#[derive(Clone)]
pub struct DualSubmissionRace {
    config: RaceConfig,
    local: Arc<dyn BlockSubmitter>,
    remote: Arc<dyn BlockSubmitter>,
    archive: Arc<dyn CandidateArchive>,
    events: Arc<dyn EventEmitter>,
    ledger: Arc<Mutex<SubmissionLedger>>,
    metrics: Arc<Metrics>,
}

impl DualSubmissionRace {
    pub fn new(
        config: RaceConfig,
        local: Arc<dyn BlockSubmitter>,
        remote: Arc<dyn BlockSubmitter>,
        archive: Arc<dyn CandidateArchive>,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        let ledger = SubmissionLedger::new(config.confirmed_capacity);
        Self {
            config,
            local,
            remote,
            archive,
            events,
            ledger: Arc::new(Mutex::new(ledger)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Submit `candidate` on both paths and resolve at the first acceptance.
    ///
    /// # Errors
    ///
    /// - `BothPathsFailed` when neither path confirms the block
    /// - `AlreadyRacing` when the same block is mid-race from another call
    pub async fn on_block_candidate(&self, candidate: BlockCandidate) -> Result<RaceOutcome> {
        let block_hash = candidate.block_hash();
        let hash_hex = display_hash(&block_hash);

        let admission = self.ledger.lock().admit(block_hash);
        match admission {
            Admission::Start => {}
            Admission::Confirmed(winner) => {
                Metrics::incr(&self.metrics.duplicate_candidates);
                debug!(component = COMPONENT, block_hash = %hash_hex, "Block already confirmed; not raced again");
                return Ok(RaceOutcome::AlreadyConfirmed { winner, block_hash });
            }
            Admission::Racing => {
                return Err(SubmissionError::AlreadyRacing {
                    block_hash: hash_hex,
                });
            }
        }

        Metrics::incr(&self.metrics.candidates);
        log_relay_event!(
            info,
            COMPONENT,
            "Racing block candidate",
            candidate.relay_id,
            block_hash = %hash_hex,
            height = candidate.height
        );

        let shared = Arc::new(candidate.clone());
        let (tx, mut rx) = mpsc::channel(2);
        self.spawn_path(
            SubmissionPath::Local,
            Arc::clone(&self.local),
            self.config.local_timeout,
            &shared,
            &tx,
        );
        self.spawn_path(
            SubmissionPath::Remote,
            Arc::clone(&self.remote),
            self.config.remote_timeout,
            &shared,
            &tx,
        );
        drop(tx);

        let mut tally = RaceTally::new(candidate);
        loop {
            match next_report(&mut rx, &tally).await {
                Some(report) => match tally.observe(report) {
                    RaceStep::Pending => continue,
                    RaceStep::Won(winner) => {
                        self.confirm(&tally, winner);
                        self.spawn_finisher(rx, tally);
                        return Ok(RaceOutcome::Won { winner, block_hash });
                    }
                    RaceStep::BothFailed => return Err(self.reject(&tally)),
                    RaceStep::Finished => break,
                },
                None => break,
            }
        }

        // Unreachable in practice: both paths always report.
        Err(self.reject(&tally))
    }

    fn spawn_path(
        &self,
        path: SubmissionPath,
        submitter: Arc<dyn BlockSubmitter>,
        timeout: Duration,
        candidate: &Arc<BlockCandidate>,
        tx: &mpsc::Sender<PathReport>,
    ) {
        let candidate = Arc::clone(candidate);
        let tx = tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, submitter.submit(&candidate)).await {
                Ok(result) => result,
                Err(_) => Err(SubmitRejected::TimedOut {
                    after_ms: timeout.as_millis() as u64,
                }),
            };
            let _ = tx.send(PathReport::new(path, result, started.elapsed())).await;
        });
    }

    fn confirm(&self, tally: &RaceTally, winner: SubmissionPath) {
        let record = tally.record();
        let block_hash = record.block_hash;
        self.ledger.lock().confirm(block_hash, winner);

        let counter = match winner {
            SubmissionPath::Local => &self.metrics.won_local,
            SubmissionPath::Remote => &self.metrics.won_remote,
        };
        Metrics::incr(counter);

        let candidate = &record.candidate;
        log_relay_event!(
            info,
            COMPONENT,
            "Block accepted",
            candidate.relay_id,
            block_hash = %display_hash(&block_hash),
            height = candidate.height,
            winner = %winner
        );

        self.events.emit(MiningEventPayload::BlockFound {
            worker: candidate.worker.clone(),
            block_hash: display_hash(&block_hash),
            height: candidate.height,
            template: candidate.template,
            winner,
        });
        self.archive.record(record.clone());
    }

    fn reject(&self, tally: &RaceTally) -> SubmissionError {
        let record = tally.record();
        self.ledger.lock().abandon(&record.block_hash);
        Metrics::incr(&self.metrics.rejected);
        self.archive.record(record.clone());

        let failure = |path| {
            record
                .report(path)
                .and_then(|r| r.result.clone().err())
                .unwrap_or(SubmitRejected::Unreachable {
                    reason: "no result".to_string(),
                })
        };
        let local = failure(SubmissionPath::Local);
        let remote = failure(SubmissionPath::Remote);
        let block_hash = display_hash(&record.block_hash);

        error!(
            component = COMPONENT,
            relay_id = %record.candidate.relay_id,
            block_hash = %block_hash,
            height = record.candidate.height,
            local = %local,
            remote = %remote,
            "Block candidate rejected on both submission paths"
        );

        SubmissionError::BothPathsFailed {
            block_hash,
            local,
            remote,
        }
    }

    /// Record the loser once it reports.
    fn spawn_finisher(&self, mut rx: mpsc::Receiver<PathReport>, mut tally: RaceTally) {
        let archive = Arc::clone(&self.archive);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            while let Some(report) = next_report(&mut rx, &tally).await {
                let path = report.path;
                let accepted = report.is_accepted();
                if tally.observe(report) == RaceStep::Finished {
                    Metrics::incr(&metrics.redundant_results);
                    debug!(
                        component = COMPONENT,
                        block_hash = %display_hash(&tally.record().block_hash),
                        path = %path,
                        accepted,
                        "Redundant submission result recorded"
                    );
                    archive.record(tally.record().clone());
                }
                if tally.outstanding().is_empty() {
                    break;
                }
            }
        });
    }
}

/// Next report, or a synthetic failure for a path whose task vanished.
async fn next_report(rx: &mut mpsc::Receiver<PathReport>, tally: &RaceTally) -> Option<PathReport> {
    match rx.recv().await {
        Some(report) => Some(report),
        None => tally.outstanding().into_iter().next().map(|path| {
            PathReport::new(
                path,
                Err(SubmitRejected::Unreachable {
                    reason: "submission task ended without a result".to_string(),
                }),
                Duration::ZERO,
            )
        }),
    }
}
