//! # Event Pipeline Scenarios
//!
//! A relay's publisher sends through the TCP replication bridge into the
//! collector's retaining channel, and the ingestor persists into the store.
//!
//! ```text
//! EventPublisher ─► TcpReplicationChannel ═TCP═► ReplicationServer
//!                                                      │
//!                     InMemoryIngestStore ◄─ EventIngestor ◄─ channel
//! ```
//!
//! ## Flows Tested:
//!
//! 1. **Happy path**: every emitted event lands in the store intact
//! 2. **Collector outage**: events buffered during the outage arrive in
//!    order, ahead of later ones
//! 3. **Replay after restart**: the same event ID delivered twice is stored
//!    once
//! 4. **Collector restart**: events the store failed to commit before a
//!    collector restart are persisted by the restarted collector
//! 5. **Bridge credential**: a publisher with the wrong credential gets
//!    nothing into the channel

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use rp_05_event_replication::{
        EventIngestor, EventPublisher, IngestStore, IngestorConfig, InMemoryIngestStore,
        PublisherConfig, ReplicationError,
    };
    use shared_bus::{
        BridgeIdentity, ChannelConfig, ChannelError, ChannelLog, InMemoryChannelLog,
        InMemoryReplicationChannel, ReplicationChannel, ReplicationServer, SubjectFilter,
        TcpReplicationChannel,
    };
    use shared_types::{
        EventEmitter, EventId, MiningEvent, MiningEventPayload, Region, RelayCredential, RelayId,
        SubmissionPath, SystemTimeSource, TemplateId,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Collector {
        channel: InMemoryReplicationChannel,
        store: Arc<InMemoryIngestStore>,
        ingestor: Arc<EventIngestor>,
        addr: String,
    }

    /// Ingest store whose commits fail while `failing` is set.
    struct FailingCommits {
        inner: Arc<InMemoryIngestStore>,
        failing: AtomicBool,
    }

    impl IngestStore for FailingCommits {
        fn has_marker(&self, event_id: &EventId) -> Result<bool, ReplicationError> {
            self.inner.has_marker(event_id)
        }

        fn commit(&self, event: &MiningEvent, now_ms: u64) -> Result<(), ReplicationError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ReplicationError::Store("disk unavailable".to_string()));
            }
            self.inner.commit(event, now_ms)
        }

        fn evict_markers(&self, cutoff_ms: u64) -> Result<usize, ReplicationError> {
            self.inner.evict_markers(cutoff_ms)
        }

        fn get(&self, event_id: &EventId) -> Result<Option<MiningEvent>, ReplicationError> {
            self.inner.get(event_id)
        }

        fn event_count(&self) -> Result<usize, ReplicationError> {
            self.inner.event_count()
        }
    }

    async fn start_collector(shutdown: &watch::Receiver<bool>) -> Collector {
        let store = Arc::new(InMemoryIngestStore::new());
        start_collector_over(
            store.clone(),
            store,
            Arc::new(InMemoryChannelLog::new()),
            shutdown,
        )
        .await
    }

    /// Collector whose channel reloads from `log` and whose ingestor
    /// commits through `ingest`; `store` is what the assertions read.
    async fn start_collector_over(
        store: Arc<InMemoryIngestStore>,
        ingest: Arc<dyn IngestStore>,
        log: Arc<dyn ChannelLog>,
        shutdown: &watch::Receiver<bool>,
    ) -> Collector {
        // Transport dedup off, so replays reach the ingestor.
        let config = ChannelConfig {
            dedup_window: Duration::ZERO,
            ..ChannelConfig::default()
        };
        let channel = InMemoryReplicationChannel::with_log(config, log).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = ReplicationServer::new(Arc::new(channel.clone()), credential());
        tokio::spawn(server.serve(listener, shutdown.clone()));

        let config = IngestorConfig {
            fetch_wait: Duration::from_millis(50),
            error_backoff: Duration::from_millis(50),
            ..IngestorConfig::default()
        };
        let consumer = channel.durable_consumer(
            &config.durable_name,
            SubjectFilter::new(config.subject_filter.clone()),
        );
        let ingestor = Arc::new(EventIngestor::new(
            config,
            Arc::new(consumer),
            ingest,
            Arc::new(SystemTimeSource),
        ));
        let runner = Arc::clone(&ingestor);
        let ingest_shutdown = shutdown.clone();
        tokio::spawn(async move { runner.run(ingest_shutdown).await });

        Collector {
            channel,
            store,
            ingestor,
            addr,
        }
    }

    fn start_publisher(addr: &str, shutdown: &watch::Receiver<bool>) -> EventPublisher {
        let mut config = PublisherConfig::new(RelayId::new("relay-eu-1"), Region::new("eu-west"));
        config.initial_backoff = Duration::from_millis(20);
        config.max_backoff = Duration::from_millis(100);
        let publisher = EventPublisher::new(
            config,
            Arc::new(TcpReplicationChannel::new(
                addr,
                Duration::from_secs(1),
                bridge_identity("relay-eu-1", "eu-west"),
            )),
            Arc::new(SystemTimeSource),
        );
        tokio::spawn(publisher.clone().run(shutdown.clone()));
        publisher
    }

    fn connected(worker: &str) -> MiningEventPayload {
        MiningEventPayload::MinerConnected {
            worker: worker.to_string(),
            remote_addr: Some("203.0.113.7:51234".to_string()),
        }
    }

    fn stored_count(store: &InMemoryIngestStore) -> usize {
        store.event_count().unwrap()
    }

    fn channel_workers(channel: &InMemoryReplicationChannel) -> Vec<String> {
        channel
            .retained(&SubjectFilter::all())
            .into_iter()
            .filter_map(|m| match MiningEvent::decode(&m.payload).unwrap().payload {
                MiningEventPayload::MinerConnected { worker, .. } => Some(worker),
                _ => None,
            })
            .collect()
    }

    // =============================================================================
    // INTEGRATION TESTS: RELAY → COLLECTOR
    // =============================================================================

    #[tokio::test]
    async fn test_emitted_events_persisted_intact() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let collector = start_collector(&shutdown).await;
        let publisher = start_publisher(&collector.addr, &shutdown);

        let payloads = vec![
            connected("bc1qminer.rig1"),
            MiningEventPayload::ShareSubmitted {
                worker: "bc1qminer.rig1".to_string(),
                template: TemplateId::new(0, 12),
                difficulty: 2048.0,
                accepted: true,
            },
            MiningEventPayload::BlockFound {
                worker: "bc1qminer.rig1".to_string(),
                block_hash: "00000000000000000001c0ffee".to_string(),
                height: 840_001,
                template: TemplateId::new(0, 12),
                winner: SubmissionPath::Remote,
            },
        ];
        let ids: Vec<EventId> = payloads
            .iter()
            .map(|p| publisher.emit(p.clone()).unwrap())
            .collect();

        wait_until("three events stored", || stored_count(&collector.store) == 3).await;

        for (id, payload) in ids.iter().zip(&payloads) {
            let stored = collector.store.get(id).unwrap().unwrap();
            assert_eq!(&stored.payload, payload);
            assert_eq!(stored.region, Region::new("eu-west"));
            assert_eq!(stored.event_id.boot_id, publisher.boot_id());
        }
        let subjects: Vec<String> = collector
            .channel
            .retained(&SubjectFilter::new("events.eu-west.block_found"))
            .into_iter()
            .map(|m| m.subject)
            .collect();
        assert_eq!(subjects, vec!["events.eu-west.block_found".to_string()]);

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_outage_backlog_arrives_in_order() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let collector = start_collector(&shutdown).await;
        let publisher = start_publisher(&collector.addr, &shutdown);

        collector.channel.set_available(false);
        for i in 0..50 {
            publisher.emit(connected(&format!("w{i}")));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(collector.channel.is_empty());
        assert_eq!(publisher.buffered(), 50);

        collector.channel.set_available(true);
        publisher.emit(connected("late"));
        wait_until("backlog stored", || stored_count(&collector.store) == 51).await;

        let mut expected: Vec<String> = (0..50).map(|i| format!("w{i}")).collect();
        expected.push("late".to_string());
        assert_eq!(channel_workers(&collector.channel), expected);
        assert_eq!(publisher.stats().published, 51);
        assert_eq!(publisher.stats().dropped, 0);
        assert!(publisher.stats().retries > 0);

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_replayed_event_stored_once() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let collector = start_collector(&shutdown).await;

        // A relay that restarted and resent its unconfirmed buffer.
        let event = MiningEvent {
            event_id: EventId::new(RelayId::new("relay-ap-2"), 1_700_000_000_000, 41),
            region: Region::new("ap-south"),
            emitted_at_ms: 1_700_000_000_500,
            payload: connected("bc1qminer.rig9"),
        };
        let bridge = TcpReplicationChannel::new(
            collector.addr.clone(),
            Duration::from_secs(1),
            bridge_identity("relay-ap-2", "ap-south"),
        );
        for _ in 0..2 {
            bridge
                .publish(
                    &event.subject(),
                    event.encode().unwrap(),
                    &event.event_id.to_string(),
                )
                .await
                .unwrap();
        }
        assert_eq!(collector.channel.len(), 2);

        wait_until("both deliveries settled", || {
            let stats = collector.ingestor.stats();
            stats.processed + stats.duplicates == 2
        })
        .await;

        assert_eq!(stored_count(&collector.store), 1);
        assert_eq!(collector.store.get(&event.event_id).unwrap(), Some(event));
        assert_eq!(collector.ingestor.stats().duplicates, 1);
        wait_until("nothing pending", || {
            collector.channel.pending_count("collector") == 0
        })
        .await;

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_failed_commits_persisted_after_collector_restart() {
        let store = Arc::new(InMemoryIngestStore::new());
        let flaky = Arc::new(FailingCommits {
            inner: store.clone(),
            failing: AtomicBool::new(true),
        });
        let log = Arc::new(InMemoryChannelLog::new());

        let (first_tx, first_shutdown) = watch::channel(false);
        let first = start_collector_over(store.clone(), flaky.clone(), log.clone(), &first_shutdown).await;
        let bridge = TcpReplicationChannel::new(
            first.addr.clone(),
            Duration::from_secs(1),
            bridge_identity("relay-us-1", "us-east"),
        );
        let events: Vec<MiningEvent> = (1..=3)
            .map(|counter| MiningEvent {
                event_id: EventId::new(RelayId::new("relay-us-1"), 1_700_000_000_000, counter),
                region: Region::new("us-east"),
                emitted_at_ms: 1_700_000_000_000 + counter,
                payload: connected(&format!("bc1qminer.rig{counter}")),
            })
            .collect();
        for event in &events {
            bridge
                .publish(&event.subject(), event.encode().unwrap(), &event.event_id.to_string())
                .await
                .unwrap();
        }

        wait_until("every commit failed", || first.ingestor.stats().persist_failures >= 3).await;
        assert_eq!(stored_count(&store), 0);
        first_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The disk is back; a fresh collector process over the same storage.
        flaky.failing.store(false, Ordering::SeqCst);
        let (second_tx, second_shutdown) = watch::channel(false);
        let second = start_collector_over(store.clone(), flaky, log, &second_shutdown).await;
        assert_eq!(second.channel.len(), 3);

        wait_until("all three stored", || stored_count(&store) == 3).await;
        for event in &events {
            assert_eq!(store.get(&event.event_id).unwrap().as_ref(), Some(event));
        }
        wait_until("nothing pending", || {
            second.channel.pending_count("collector") == 0
        })
        .await;

        second_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_wrong_bridge_credential_publishes_nothing() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let collector = start_collector(&shutdown).await;

        let impostor = TcpReplicationChannel::new(
            collector.addr.clone(),
            Duration::from_secs(1),
            BridgeIdentity {
                relay_id: RelayId::new("relay-eu-1"),
                region: Region::new("eu-west"),
                credential: RelayCredential::new(b"not the pool credential".to_vec()),
            },
        );
        let result = impostor
            .publish("events.eu-west.block_found", b"forged".to_vec(), "forged-1")
            .await;
        assert!(matches!(result, Err(ChannelError::Unavailable(_))));
        assert!(collector.channel.is_empty());
        assert_eq!(stored_count(&collector.store), 0);

        shutdown_tx.send(true).unwrap();
    }
}
