//! # Template Channel Scenarios
//!
//! A real primary (relay manager + template server) and a real relay
//! (channel client + failover controller + applier) talking over loopback
//! TCP.
//!
//! ## Flows Tested:
//!
//! 1. **Broadcast → Apply**: templates reach relay work in generation order
//! 2. **Late join**: a relay registering after a broadcast gets the latest
//!    template immediately
//! 3. **Remote submission**: a candidate sent over the channel reaches the
//!    primary's node
//! 4. **Authentication**: a relay with the wrong credential never gets work

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use parking_lot::Mutex;
    use rp_01_relay_manager::{
        ManagerConfig, RelayManager, RelayManagerHandle, TemplateBroadcaster, TemplateServer,
    };
    use rp_02_template_sync::{
        ApplierConfig, ChannelClientConfig, ChannelEvent, RemoteSubmitter, TemplateApplier,
        TemplateChannelClient, TemplateGenerator,
    };
    use rp_03_failover::{FailoverConfig, FailoverController, FailoverSnapshot};
    use shared_types::{
        BlockCandidate, BlockHeader, BlockSubmitter, FailoverMode, NodeSubmitter, Region,
        RelayCredential, RelayId, SystemTimeSource, TemplateId, TemplateSource,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, watch};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Primary {
        handle: RelayManagerHandle,
        addr: String,
        node: Arc<ScriptedNode>,
    }

    async fn start_primary(shutdown: &watch::Receiver<bool>) -> Primary {
        let config = ManagerConfig::default();
        let (manager, handle) = RelayManager::new(config.clone());
        tokio::spawn(manager.run(shutdown.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let node = ScriptedNode::new(101);
        let server = TemplateServer::new(
            handle.clone(),
            credential(),
            Arc::new(NodeSubmitter::new(node.clone())),
            config,
        );
        tokio::spawn(server.serve(listener, shutdown.clone()));

        Primary { handle, addr, node }
    }

    struct Relay {
        applier: Arc<TemplateApplier>,
        failover: watch::Receiver<FailoverSnapshot>,
        remote: RemoteSubmitter,
        /// Sequences in the order the relay installed them.
        trace: Arc<Mutex<Vec<u64>>>,
        /// Set once the primary refuses the handshake.
        auth_rejected: Arc<Mutex<bool>>,
    }

    fn start_relay(
        addr: &str,
        credential: RelayCredential,
        shutdown: &watch::Receiver<bool>,
    ) -> Relay {
        let (client_tx, mut client_rx) = mpsc::channel(64);
        let mut config =
            ChannelClientConfig::new(addr, RelayId::new("relay-eu-1"), Region::new("eu-west"));
        config.heartbeat_interval = Duration::from_millis(100);
        config.reconnect_initial_backoff = Duration::from_millis(20);
        config.reconnect_max_backoff = Duration::from_millis(200);
        let client = TemplateChannelClient::new(config, credential, client_tx);
        let remote = client.remote_submitter();
        tokio::spawn(client.run(shutdown.clone()));

        // Tap the channel events on their way to the controller.
        let (events_tx, events_rx) = mpsc::channel(64);
        let auth_rejected = Arc::new(Mutex::new(false));
        let seen = Arc::clone(&auth_rejected);
        tokio::spawn(async move {
            while let Some(event) = client_rx.recv().await {
                if matches!(event, ChannelEvent::AuthRejected { .. }) {
                    *seen.lock() = true;
                }
                if events_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let applier = Arc::new(TemplateApplier::new(ApplierConfig::default()));
        let generator = TemplateGenerator::new(
            ScriptedNode::new(101),
            Arc::new(SystemTimeSource),
            TemplateSource::Local,
        );
        let controller = FailoverController::new(
            FailoverConfig::default(),
            Arc::clone(&applier),
            generator,
            events_rx,
        );
        let failover = controller.subscribe();
        tokio::spawn(controller.run(shutdown.clone()));

        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut work = applier.work_view();
        let installed = Arc::clone(&trace);
        tokio::spawn(async move {
            while let Some(active) = work.changed().await {
                installed.lock().push(active.template.sequence);
            }
        });

        Relay {
            applier,
            failover,
            remote,
            trace,
            auth_rejected,
        }
    }

    async fn wait_for_registration(handle: &RelayManagerHandle) {
        for _ in 0..250 {
            let statuses = handle.snapshot().await.unwrap();
            if statuses.iter().any(|s| s.authenticated) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("relay never registered with the primary");
    }

    fn installed_sequence(relay: &Relay) -> Option<u64> {
        relay.applier.current_id().map(|id| id.sequence)
    }

    // =============================================================================
    // INTEGRATION TESTS: PRIMARY → RELAY
    // =============================================================================

    #[tokio::test]
    async fn test_broadcast_templates_install_in_generation_order() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let primary = start_primary(&shutdown).await;
        let relay = start_relay(&primary.addr, credential(), &shutdown);
        wait_for_registration(&primary.handle).await;

        primary.handle.broadcast_template(primary_template(1, 101)).await.unwrap();
        wait_until("template 1 installed", || installed_sequence(&relay) == Some(1)).await;

        primary.handle.broadcast_template(primary_template(3, 101)).await.unwrap();
        wait_until("template 3 installed", || installed_sequence(&relay) == Some(3)).await;

        // Out of generation order: never reaches relay work.
        primary.handle.broadcast_template(primary_template(2, 101)).await.unwrap();
        primary.handle.broadcast_template(primary_template(4, 102)).await.unwrap();
        wait_until("template 4 installed", || installed_sequence(&relay) == Some(4)).await;

        assert_eq!(*relay.trace.lock(), vec![1, 3, 4]);
        assert_eq!(relay.failover.borrow().mode, FailoverMode::Following);
        assert!(relay.failover.borrow().channel_connected);

        let handle = primary.handle.clone();
        let mut acked = 0;
        for _ in 0..250 {
            acked = handle.snapshot().await.unwrap()[0].acked_sequence;
            if acked == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(acked, 4);

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_late_relay_receives_latest_template_on_registration() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let primary = start_primary(&shutdown).await;

        primary.handle.broadcast_template(primary_template(7, 101)).await.unwrap();
        primary.handle.broadcast_template(primary_template(8, 101)).await.unwrap();

        let relay = start_relay(&primary.addr, credential(), &shutdown);
        wait_until("latest template installed", || installed_sequence(&relay) == Some(8)).await;
        assert_eq!(*relay.trace.lock(), vec![8]);

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_remote_submission_reaches_primary_node() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let primary = start_primary(&shutdown).await;
        let relay = start_relay(&primary.addr, credential(), &shutdown);
        wait_for_registration(&primary.handle).await;
        wait_until("submitter connected", || relay.remote.is_connected()).await;

        let candidate = BlockCandidate {
            header: BlockHeader {
                nonce: 42,
                ..BlockHeader::default()
            },
            block_data: vec![0xde, 0xad],
            relay_id: RelayId::new("relay-eu-1"),
            worker: "bc1qworker.rig1".to_string(),
            template: TemplateId::new(0, 1),
            height: 101,
            discovered_at_ms: 0,
        };
        let accepted = relay.remote.submit(&candidate).await.unwrap();

        assert_eq!(accepted.block_hash, candidate.block_hash());
        assert_eq!(primary.node.submitted(), vec![candidate.block_hash()]);

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_wrong_credential_never_gets_work() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let primary = start_primary(&shutdown).await;
        primary.handle.broadcast_template(primary_template(1, 101)).await.unwrap();

        let relay = start_relay(
            &primary.addr,
            RelayCredential::new(b"not the pool credential".to_vec()),
            &shutdown,
        );
        wait_until("auth rejected", || *relay.auth_rejected.lock()).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(relay.applier.current_id().is_none());
        assert!(primary
            .handle
            .snapshot()
            .await
            .unwrap()
            .iter()
            .all(|s| !s.authenticated));

        shutdown_tx.send(true).unwrap();
    }
}
