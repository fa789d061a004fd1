//! # Runtime Role Scenarios
//!
//! The three roles wired exactly as the binary wires them, on loopback
//! ports, with scripted nodes in place of Bitcoin Core.
//!
//! ## Flows Tested:
//!
//! 1. **Full pool**: primary work reaches the relay; relay events reach the
//!    collector's store
//! 2. **Primary unreachable**: the relay mines on local work and submits
//!    through its own node
//! 3. **Process lifecycle**: `PoolRuntime` starts from TOML and drains on
//!    shutdown

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use pool_runtime::container::{CollectorSettings, PoolConfig, PrimarySettings, RelaySettings};
    use pool_runtime::wiring::{collector, primary, relay};
    use pool_runtime::{CollectorStorage, PoolRuntime, RoleHandles, SolvedBlock};
    use rp_02_template_sync::ShareVerdict;
    use rp_05_event_replication::{IngestStore, InMemoryIngestStore};
    use shared_bus::{InMemoryChannelLog, TcpReplicationChannel};
    use shared_types::{
        BlockHeader, FailoverMode, MiningEventPayload, MiningEventType, SubmissionPath,
        SystemTimeSource, TemplateSource, TimeSource,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::watch;
    use tokio::task::JoinSet;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const CREDENTIAL: &str = "00112233445566778899aabbccddeeff";
    const REPORT_EVERY: Duration = Duration::from_secs(60);

    fn time() -> Arc<dyn TimeSource> {
        Arc::new(SystemTimeSource)
    }

    async fn start_collector(
        store: Arc<InMemoryIngestStore>,
        shutdown: &watch::Receiver<bool>,
        tasks: &mut JoinSet<()>,
    ) -> collector::CollectorRole {
        let settings = CollectorSettings {
            listen_addr: "127.0.0.1:0".to_string(),
            credential: CREDENTIAL.to_string(),
            ..CollectorSettings::default()
        };
        let storage = CollectorStorage::new(store, Arc::new(InMemoryChannelLog::new()));
        collector::start(&settings, storage, time(), REPORT_EVERY, shutdown.clone(), tasks)
            .await
            .unwrap()
    }

    async fn start_primary(
        node: Arc<ScriptedNode>,
        shutdown: &watch::Receiver<bool>,
        tasks: &mut JoinSet<()>,
    ) -> primary::PrimaryRole {
        let settings = PrimarySettings {
            listen_addr: "127.0.0.1:0".to_string(),
            credential: CREDENTIAL.to_string(),
            template_poll_interval: Duration::from_millis(50),
            ..PrimarySettings::default()
        };
        primary::start(&settings, node, time(), REPORT_EVERY, shutdown.clone(), tasks)
            .await
            .unwrap()
    }

    fn start_relay(
        primary_addr: String,
        collector_addr: String,
        node: Arc<ScriptedNode>,
        shutdown: &watch::Receiver<bool>,
        tasks: &mut JoinSet<()>,
    ) -> relay::RelayRole {
        let settings = RelaySettings {
            relay_id: "relay-eu-1".to_string(),
            region: "eu-west".to_string(),
            primary_addr,
            collector_addr: collector_addr.clone(),
            credential: CREDENTIAL.to_string(),
            heartbeat_interval: Duration::from_millis(100),
            failover_threshold: Duration::from_secs(2),
            local_poll_interval: Duration::from_millis(100),
            ..RelaySettings::default()
        };
        let channel = Arc::new(TcpReplicationChannel::new(
            collector_addr,
            Duration::from_secs(1),
            settings.bridge_identity().unwrap(),
        ));
        relay::start(&settings, node, channel, time(), REPORT_EVERY, shutdown.clone(), tasks)
            .unwrap()
    }

    /// An address nothing listens on.
    async fn dead_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn stored_of(store: &InMemoryIngestStore, kind: MiningEventType) -> Vec<MiningEventPayload> {
        store
            .events()
            .into_iter()
            .filter(|e| e.event_type() == kind)
            .map(|e| e.payload)
            .collect()
    }

    fn work_source(role: &relay::RelayRole) -> Option<TemplateSource> {
        role.intake.work().current().map(|(_, t)| t.source)
    }

    // =============================================================================
    // INTEGRATION TESTS: WIRED ROLES
    // =============================================================================

    #[tokio::test]
    async fn test_full_pool_moves_work_down_and_events_up() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let store = Arc::new(InMemoryIngestStore::new());

        let collector = start_collector(store.clone(), &shutdown, &mut tasks).await;
        let archival = ScriptedNode::new(101);
        let primary = start_primary(archival.clone(), &shutdown, &mut tasks).await;
        let relay = start_relay(
            primary.local_addr.to_string(),
            collector.local_addr.to_string(),
            ScriptedNode::new(101),
            &shutdown,
            &mut tasks,
        );

        wait_until("primary work on the relay", || {
            work_source(&relay) == Some(TemplateSource::Primary)
        })
        .await;
        assert_eq!(relay.failover.borrow().mode, FailoverMode::Following);

        let job = current_id(relay.intake.work());
        let verdict = relay.intake.on_share(&share("bc1qminer.rig1", job));
        assert_eq!(verdict, ShareVerdict::Accepted);
        wait_until("share stored", || {
            !stored_of(&store, MiningEventType::ShareSubmitted).is_empty()
        })
        .await;

        // A new block on the archival node travels primary → relay, and the
        // relay reports it.
        archival.advance_tip();
        wait_until("new tip on the relay", || {
            relay.intake.work().current().is_some_and(|(_, t)| t.height == 102)
        })
        .await;
        wait_until("network block stored", || {
            stored_of(&store, MiningEventType::NetworkBlock)
                .iter()
                .any(|e| matches!(e, MiningEventPayload::NetworkBlock { height: 101, .. }))
        })
        .await;

        let shares = stored_of(&store, MiningEventType::ShareSubmitted);
        assert!(matches!(
            &shares[0],
            MiningEventPayload::ShareSubmitted { accepted: true, template, .. } if *template == job
        ));
        assert!(store.events().iter().all(|e| e.region.as_str() == "eu-west"));
        assert!(!primary.manager.snapshot().await.unwrap().is_empty());

        shutdown_tx.send(true).unwrap();
        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_relay_without_primary_mines_and_submits_locally() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let store = Arc::new(InMemoryIngestStore::new());

        let collector = start_collector(store.clone(), &shutdown, &mut tasks).await;
        let local = ScriptedNode::new(101);
        let relay = start_relay(
            dead_addr().await,
            collector.local_addr.to_string(),
            local.clone(),
            &shutdown,
            &mut tasks,
        );

        wait_until("local work on the relay", || {
            work_source(&relay) == Some(TemplateSource::Local)
        })
        .await;
        assert_eq!(relay.failover.borrow().mode, FailoverMode::Independent);

        let job = current_id(relay.intake.work());
        assert_eq!(
            relay.intake.on_share(&share("bc1qminer.rig1", job)),
            ShareVerdict::Accepted
        );

        let solved = SolvedBlock {
            worker: "bc1qminer.rig1".to_string(),
            template: job,
            header: BlockHeader {
                nonce: 7,
                ..BlockHeader::default()
            },
            block_data: vec![0x02; 81],
        };
        let outcome = relay.intake.on_block_candidate(solved).await.unwrap();
        assert_eq!(outcome.winner(), SubmissionPath::Local);
        assert_eq!(local.submitted().len(), 1);

        wait_until("block found stored", || {
            !stored_of(&store, MiningEventType::BlockFound).is_empty()
        })
        .await;
        assert!(matches!(
            &stored_of(&store, MiningEventType::BlockFound)[0],
            MiningEventPayload::BlockFound {
                winner: SubmissionPath::Local,
                height: 101,
                ..
            }
        ));

        shutdown_tx.send(true).unwrap();
        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_runtime_starts_collector_from_toml_and_shuts_down() {
        let config = PoolConfig::from_toml(
            r#"
            metrics_interval_ms = 100

            [mode.collector]
            listen_addr = "127.0.0.1:0"
            credential = "00112233445566778899aabbccddeeff"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let mut runtime = PoolRuntime::new(config);
        let RoleHandles::Collector(role) = runtime.start().await.unwrap() else {
            panic!("expected collector role");
        };
        assert_ne!(role.local_addr.port(), 0);

        tokio::time::timeout(Duration::from_secs(10), runtime.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_primary_starts_with_node_unreachable() {
        let config = PoolConfig::from_toml(&format!(
            r#"
            [node]
            url = "http://{}"
            timeout_ms = 200

            [mode.primary]
            listen_addr = "127.0.0.1:0"
            credential = "{CREDENTIAL}"
            template_poll_interval_ms = 50
            "#,
            dead_addr().await
        ))
        .unwrap();
        config.validate().unwrap();

        let mut runtime = PoolRuntime::new(config);
        let RoleHandles::Primary(role) = runtime.start().await.unwrap() else {
            panic!("expected primary role");
        };

        // The template source keeps retrying; no relay has seen anything.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(role.manager.snapshot().await.unwrap().is_empty());
        assert_eq!(role.manager.metrics().snapshot().templates_broadcast, 0);

        tokio::time::timeout(Duration::from_secs(10), runtime.shutdown())
            .await
            .unwrap();
    }
}
