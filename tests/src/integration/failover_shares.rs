//! # Failover Share Scenarios
//!
//! Miners keep hashing through a primary outage. The relay's failover
//! controller, applier and share intake run for real; the template channel
//! is replaced by its event stream so time can be paused.
//!
//! ## Flows Tested:
//!
//! 1. **Outage**: every share is accepted while the relay goes independent
//!    and comes back
//! 2. **Network blocks**: a new tip seen only by the local node is reported
//!    once

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use pool_runtime::share_intake::watch_network_blocks;
    use pool_runtime::ShareIntake;
    use rp_02_template_sync::{
        ApplierConfig, ChannelEvent, ShareVerdict, TemplateApplier, TemplateGenerator,
    };
    use rp_03_failover::{FailoverConfig, FailoverController, FailoverSnapshot};
    use shared_types::{FailoverMode, ManualTimeSource, MiningEventPayload, TemplateId, TemplateSource};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const STEP: Duration = Duration::from_millis(500);

    struct Relay {
        node: Arc<ScriptedNode>,
        channel: mpsc::Sender<ChannelEvent>,
        failover: watch::Receiver<FailoverSnapshot>,
        intake: ShareIntake,
        emitter: Arc<RecordingEmitter>,
        shutdown: watch::Sender<bool>,
    }

    fn relay() -> Relay {
        let applier = Arc::new(TemplateApplier::new(ApplierConfig::default()));
        let node = ScriptedNode::new(101);
        let time = Arc::new(ManualTimeSource::new(1_700_000_000_000));
        let generator = TemplateGenerator::new(node.clone(), time.clone(), TemplateSource::Local);

        let (channel, channel_rx) = mpsc::channel(64);
        let controller = FailoverController::new(
            FailoverConfig::default(),
            Arc::clone(&applier),
            generator,
            channel_rx,
        );
        let failover = controller.subscribe();
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(controller.run(shutdown_rx.clone()));

        let emitter = Arc::new(RecordingEmitter::default());
        tokio::spawn(watch_network_blocks(
            applier.work_view(),
            emitter.clone(),
            shutdown_rx,
        ));

        let intake = intake(
            &applier,
            DelayedSubmitter::accepting(Duration::ZERO),
            DelayedSubmitter::accepting(Duration::ZERO),
            Arc::clone(&emitter),
            time,
        );

        Relay {
            node,
            channel,
            failover,
            intake,
            emitter,
            shutdown,
        }
    }

    impl Relay {
        async fn send(&self, event: ChannelEvent) {
            self.channel.send(event).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        fn mode(&self) -> FailoverMode {
            self.failover.borrow().mode
        }
    }

    fn network_block_heights(emitter: &RecordingEmitter) -> Vec<u64> {
        emitter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MiningEventPayload::NetworkBlock { height, .. } => Some(height),
                _ => None,
            })
            .collect()
    }

    // =============================================================================
    // INTEGRATION TESTS: SHARES ACROSS FAILOVER
    // =============================================================================

    /// Primary heartbeats for 5s, falls silent for 15s, then returns with a
    /// fresh template. A miner submits every 500ms on the job it was handed
    /// one step earlier.
    #[tokio::test(start_paused = true)]
    async fn test_no_share_rejected_across_outage_and_recovery() {
        let relay = relay();
        relay.send(ChannelEvent::Connected).await;
        relay.send(ChannelEvent::Template(primary_template(1, 101))).await;

        let mut job = current_id(relay.intake.work());
        let mut modes = Vec::new();
        for step in 0..60u32 {
            let elapsed = STEP * step;
            if elapsed < Duration::from_secs(5) {
                relay.send(ChannelEvent::HeartbeatAcked).await;
            }
            if elapsed == Duration::from_secs(20) {
                relay.send(ChannelEvent::Connected).await;
                relay.send(ChannelEvent::Template(primary_template(2, 101))).await;
            }

            tokio::time::sleep(STEP).await;

            let verdict = relay.intake.on_share(&share("bc1qminer.rig1", job));
            assert_eq!(verdict, ShareVerdict::Accepted, "share on {job} at step {step}");

            modes.push(relay.mode());
            job = current_id(relay.intake.work());
        }

        // Silent since the last heartbeat at 4.5s; threshold is 10s.
        assert_eq!(modes[27], FailoverMode::Following);
        assert_eq!(modes[30], FailoverMode::Independent);
        assert_eq!(modes[40], FailoverMode::Following);
        assert_eq!(relay.mode(), FailoverMode::Following);

        // Local work in epoch 1, primary work again in epoch 2.
        let current = current_id(relay.intake.work());
        assert_eq!(current, TemplateId::new(2, 2));

        let shares = relay.emitter.shares();
        assert_eq!(shares.len(), 60);
        assert!(shares.iter().all(|(_, accepted)| *accepted));
        assert!(shares.iter().any(|(id, _)| id.epoch == 1));

        relay.shutdown.send(true).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_job_rejected_after_grace_window() {
        let relay = relay();
        relay.send(ChannelEvent::Connected).await;
        relay.send(ChannelEvent::Template(primary_template(1, 101))).await;
        let old = current_id(relay.intake.work());

        relay.send(ChannelEvent::Template(primary_template(2, 101))).await;
        assert_eq!(
            relay.intake.on_share(&share("bc1qminer.rig1", old)),
            ShareVerdict::Accepted
        );

        // Keep the primary alive past the two minute grace window.
        for _ in 0..130 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            relay.send(ChannelEvent::HeartbeatAcked).await;
        }
        assert_eq!(
            relay.intake.on_share(&share("bc1qminer.rig1", old)),
            ShareVerdict::Stale
        );
        assert_eq!(relay.emitter.shares().last(), Some(&(old, false)));

        relay.shutdown.send(true).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tip_seen_while_independent_is_reported_once() {
        let relay = relay();
        relay.send(ChannelEvent::Connected).await;
        relay.send(ChannelEvent::Template(primary_template(1, 101))).await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(relay.mode(), FailoverMode::Independent);

        relay.node.advance_tip();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(relay.intake.work().current().unwrap().1.height, 102);

        // Primary catches up on the same tip.
        relay.send(ChannelEvent::Connected).await;
        relay.send(ChannelEvent::Template(primary_template(2, 102))).await;
        assert_eq!(relay.mode(), FailoverMode::Following);

        assert_eq!(network_block_heights(&relay.emitter), vec![100, 101]);

        relay.shutdown.send(true).unwrap();
    }
}
