//! Shared fakes for the integration scenarios.

use async_trait::async_trait;
use parking_lot::Mutex;
use rp_02_template_sync::{ShareSubmission, TemplateApplier, WorkView};
use rp_04_block_submission::{DualSubmissionRace, InMemoryCandidateArchive, RaceConfig};
use shared_bus::BridgeIdentity;
use shared_types::{
    BlockCandidate, BlockSubmitter, BlockTemplate, EventEmitter, EventId, Hash, LocalNode,
    MiningEventPayload, NodeError, NodeTemplate, Region, RelayCredential, RelayId,
    SubmitAccepted, SubmitRejected, TemplateId, TemplateSource, TimeSource,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Regtest-style compact target every fixture template carries.
pub const EASY_BITS: u32 = 0x207f_ffff;

pub fn credential() -> RelayCredential {
    RelayCredential::new(b"relay-pool integration credential".to_vec())
}

/// Bridge identity of `relay_id` in `region`, holding [`credential`].
pub fn bridge_identity(relay_id: &str, region: &str) -> BridgeIdentity {
    BridgeIdentity {
        relay_id: RelayId::new(relay_id),
        region: Region::new(region),
        credential: credential(),
    }
}

pub fn node_template(height: u64) -> NodeTemplate {
    NodeTemplate {
        height,
        prev_block_hash: [height as u8; 32],
        coinbase_value: 312_500_000,
        tx_commitment: [0xab; 32],
        bits: EASY_BITS,
        curtime: 1_700_000_000,
    }
}

pub fn primary_template(sequence: u64, height: u64) -> BlockTemplate {
    BlockTemplate::from_node(node_template(height), sequence, TemplateSource::Primary, 0)
}

pub fn share(worker: &str, template: TemplateId) -> ShareSubmission {
    ShareSubmission {
        worker: worker.to_string(),
        template,
        difficulty: 1024.0,
        meets_share_target: true,
    }
}

/// Current work id, panicking if the relay has none yet.
pub fn current_id(work: &WorkView) -> TemplateId {
    match work.current() {
        Some((id, _)) => id,
        None => panic!("relay has no work yet"),
    }
}

/// A node whose work can be moved forward by the test. It accepts every
/// block and remembers what it was sent.
pub struct ScriptedNode {
    work: Mutex<NodeTemplate>,
    submitted: Mutex<Vec<Hash>>,
}

impl ScriptedNode {
    pub fn new(height: u64) -> Arc<Self> {
        Arc::new(Self {
            work: Mutex::new(node_template(height)),
            submitted: Mutex::new(Vec::new()),
        })
    }

    /// A new block arrived on the network.
    pub fn advance_tip(&self) {
        let mut work = self.work.lock();
        *work = node_template(work.height + 1);
    }

    pub fn submitted(&self) -> Vec<Hash> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl LocalNode for ScriptedNode {
    async fn get_block_template(&self) -> Result<NodeTemplate, NodeError> {
        Ok(self.work.lock().clone())
    }

    async fn submit_block(
        &self,
        candidate: &BlockCandidate,
    ) -> Result<SubmitAccepted, SubmitRejected> {
        self.submitted.lock().push(candidate.block_hash());
        Ok(SubmitAccepted {
            block_hash: candidate.block_hash(),
        })
    }
}

/// Submitter answering after a fixed delay.
pub struct DelayedSubmitter {
    delay: Duration,
    rejection: Option<SubmitRejected>,
}

impl DelayedSubmitter {
    pub fn accepting(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            rejection: None,
        })
    }

    pub fn rejecting(delay: Duration, reason: &str) -> Arc<Self> {
        Arc::new(Self {
            delay,
            rejection: Some(SubmitRejected::Rejected {
                reason: reason.to_string(),
            }),
        })
    }
}

#[async_trait]
impl BlockSubmitter for DelayedSubmitter {
    async fn submit(&self, candidate: &BlockCandidate) -> Result<SubmitAccepted, SubmitRejected> {
        tokio::time::sleep(self.delay).await;
        match &self.rejection {
            Some(rejection) => Err(rejection.clone()),
            None => Ok(SubmitAccepted {
                block_hash: candidate.block_hash(),
            }),
        }
    }
}

/// Emitter that keeps every payload in memory.
#[derive(Default)]
pub struct RecordingEmitter {
    counter: AtomicU64,
    events: Mutex<Vec<MiningEventPayload>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<MiningEventPayload> {
        self.events.lock().clone()
    }

    pub fn block_found(&self) -> Vec<MiningEventPayload> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, MiningEventPayload::BlockFound { .. }))
            .collect()
    }

    pub fn shares(&self) -> Vec<(TemplateId, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MiningEventPayload::ShareSubmitted {
                    template, accepted, ..
                } => Some((template, accepted)),
                _ => None,
            })
            .collect()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, payload: MiningEventPayload) -> Option<EventId> {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.lock().push(payload);
        Some(EventId::new(RelayId::new("relay-test"), 1, counter))
    }
}

/// A share intake over `applier` racing through the given submitters.
pub fn intake(
    applier: &TemplateApplier,
    local: Arc<dyn BlockSubmitter>,
    remote: Arc<dyn BlockSubmitter>,
    emitter: Arc<RecordingEmitter>,
    time: Arc<dyn TimeSource>,
) -> pool_runtime::ShareIntake {
    let race = DualSubmissionRace::new(
        RaceConfig::default(),
        local,
        remote,
        Arc::new(InMemoryCandidateArchive::default()),
        emitter.clone(),
    );
    pool_runtime::ShareIntake::new(
        RelayId::new("relay-test"),
        applier.work_view(),
        race,
        emitter,
        time,
    )
}

/// Poll `condition` every 20ms for up to five seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting until {what}");
}
