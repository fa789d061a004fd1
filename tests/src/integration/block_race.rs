//! # Block Race Scenarios
//!
//! A solved block enters through the share intake and is raced through the
//! local node and the primary. Submitters are scripted with fixed delays;
//! time is paused.
//!
//! ## Flows Tested:
//!
//! 1. **Fast local path**: local acceptance wins, one `BlockFound`
//! 2. **Slow local path**: the primary wins when the local path times out
//! 3. **Both fail**: an error and no `BlockFound`
//! 4. **Stale work**: candidates on unknown templates are not raced

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use pool_runtime::{IntakeError, ShareIntake, SolvedBlock};
    use rp_02_template_sync::{ApplierConfig, TemplateApplier};
    use rp_04_block_submission::{RaceOutcome, SubmissionError};
    use shared_types::{
        BlockHeader, BlockSubmitter, ManualTimeSource, MiningEventPayload, SubmissionPath,
        TemplateId,
    };
    use std::sync::Arc;
    use std::time::Duration;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Relay {
        applier: TemplateApplier,
        intake: ShareIntake,
        emitter: Arc<RecordingEmitter>,
    }

    fn relay(local: Arc<dyn BlockSubmitter>, remote: Arc<dyn BlockSubmitter>) -> Relay {
        let applier = TemplateApplier::new(ApplierConfig::default());
        applier.apply_template(primary_template(1, 101)).unwrap();
        let emitter = Arc::new(RecordingEmitter::default());
        let intake = intake(
            &applier,
            local,
            remote,
            Arc::clone(&emitter),
            Arc::new(ManualTimeSource::new(1_700_000_000_000)),
        );
        Relay {
            applier,
            intake,
            emitter,
        }
    }

    fn solved(template: TemplateId, nonce: u32) -> SolvedBlock {
        SolvedBlock {
            worker: "bc1qminer.rig7".to_string(),
            template,
            header: BlockHeader {
                version: 0x2000_0000,
                prev_block_hash: [101; 32],
                bits: EASY_BITS,
                nonce,
                ..BlockHeader::default()
            },
            block_data: vec![0x01; 81],
        }
    }

    fn winners(emitter: &RecordingEmitter) -> Vec<SubmissionPath> {
        emitter
            .block_found()
            .into_iter()
            .filter_map(|e| match e {
                MiningEventPayload::BlockFound { winner, .. } => Some(winner),
                _ => None,
            })
            .collect()
    }

    // =============================================================================
    // INTEGRATION TESTS: CANDIDATE → RACE → BLOCK FOUND
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_fast_local_path_wins_and_reports_once() {
        let relay = relay(
            DelayedSubmitter::accepting(Duration::from_millis(200)),
            DelayedSubmitter::accepting(Duration::from_millis(800)),
        );
        let id = relay.applier.current_id().unwrap();

        let outcome = relay.intake.on_block_candidate(solved(id, 1)).await.unwrap();
        assert_eq!(outcome.winner(), SubmissionPath::Local);
        assert!(matches!(outcome, RaceOutcome::Won { .. }));

        // Let the slower path finish; it must not report the block again.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(winners(&relay.emitter), vec![SubmissionPath::Local]);

        match &relay.emitter.block_found()[0] {
            MiningEventPayload::BlockFound {
                worker,
                height,
                template,
                ..
            } => {
                assert_eq!(worker, "bc1qminer.rig7");
                assert_eq!(*height, 101);
                assert_eq!(*template, id);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        // The same block again is answered from memory.
        let again = relay.intake.on_block_candidate(solved(id, 1)).await.unwrap();
        assert!(matches!(
            again,
            RaceOutcome::AlreadyConfirmed {
                winner: SubmissionPath::Local,
                ..
            }
        ));
        assert_eq!(winners(&relay.emitter).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_wins_when_local_node_hangs() {
        let relay = relay(
            DelayedSubmitter::accepting(Duration::from_secs(60)),
            DelayedSubmitter::accepting(Duration::from_millis(800)),
        );
        let id = relay.applier.current_id().unwrap();

        let outcome = relay.intake.on_block_candidate(solved(id, 2)).await.unwrap();
        assert_eq!(outcome.winner(), SubmissionPath::Remote);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(winners(&relay.emitter), vec![SubmissionPath::Remote]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_paths_failing_reports_no_block() {
        let relay = relay(
            DelayedSubmitter::rejecting(Duration::from_millis(100), "high-hash"),
            DelayedSubmitter::rejecting(Duration::from_millis(300), "bad-prevblk"),
        );
        let id = relay.applier.current_id().unwrap();

        let err = relay.intake.on_block_candidate(solved(id, 3)).await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::Submission(SubmissionError::BothPathsFailed { .. })
        ));
        assert!(relay.emitter.block_found().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidate_on_unknown_template_not_raced() {
        let relay = relay(
            DelayedSubmitter::accepting(Duration::ZERO),
            DelayedSubmitter::accepting(Duration::ZERO),
        );
        let unknown = TemplateId::new(0, 99);

        let err = relay.intake.on_block_candidate(solved(unknown, 4)).await.unwrap_err();
        assert!(matches!(err, IntakeError::UnknownTemplate(id) if id == unknown));
        assert!(relay.emitter.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidate_on_superseded_template_still_raced() {
        let relay = relay(
            DelayedSubmitter::accepting(Duration::from_millis(50)),
            DelayedSubmitter::accepting(Duration::from_millis(50)),
        );
        let old = relay.applier.current_id().unwrap();
        relay.applier.apply_template(primary_template(2, 102)).unwrap();

        let outcome = relay.intake.on_block_candidate(solved(old, 5)).await.unwrap();
        assert!(matches!(outcome, RaceOutcome::Won { .. }));
        match &relay.emitter.block_found()[0] {
            MiningEventPayload::BlockFound { height, .. } => assert_eq!(*height, 101),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
