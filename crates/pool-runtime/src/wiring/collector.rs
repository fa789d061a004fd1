//! Collector role: hosts the replication channel and drains it into the
//! ingest store.

use super::spawn_reporter;
use crate::container::{parse_credential, CollectorSettings};
use anyhow::{Context, Result};
use rp_05_event_replication::{EventIngestor, InMemoryIngestStore, IngestStore};
use shared_bus::{
    ChannelLog, InMemoryChannelLog, InMemoryReplicationChannel, ReplicationServer, SubjectFilter,
};
use shared_types::TimeSource;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::info;

/// Handles of a running collector.
pub struct CollectorRole {
    pub channel: InMemoryReplicationChannel,
    pub ingestor: Arc<EventIngestor>,
    pub local_addr: SocketAddr,
}

/// Where the collector keeps ingested events and the channel it drains.
///
/// Both halves live in the same backend so a restart finds the retained
/// messages and the ingestor's ack floor next to the rows.
#[derive(Clone)]
pub struct CollectorStorage {
    pub ingest: Arc<dyn IngestStore>,
    pub log: Arc<dyn ChannelLog>,
}

impl CollectorStorage {
    pub fn new(ingest: Arc<dyn IngestStore>, log: Arc<dyn ChannelLog>) -> Self {
        Self { ingest, log }
    }

    /// Process-memory storage. Survives a collector restart inside the same
    /// process only.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryIngestStore::new()), Arc::new(InMemoryChannelLog::new()))
    }
}

/// Open the configured storage: RocksDB when `data_dir` is set, memory
/// otherwise.
pub fn open_store(settings: &CollectorSettings) -> Result<CollectorStorage> {
    match &settings.data_dir {
        None => {
            info!("Using in-memory collector storage; events are lost on restart");
            Ok(CollectorStorage::in_memory())
        }
        Some(dir) => open_rocksdb(dir),
    }
}

#[cfg(feature = "rocksdb")]
fn open_rocksdb(dir: &std::path::Path) -> Result<CollectorStorage> {
    use rp_05_event_replication::{RocksDbIngestStore, RocksDbStoreConfig};

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
    let store = RocksDbIngestStore::open(RocksDbStoreConfig::new(dir.to_string_lossy()))
        .context("Failed to open RocksDB ingest store")?;
    info!(path = %dir.display(), "Using RocksDB collector storage");
    let store = Arc::new(store);
    Ok(CollectorStorage::new(store.clone(), store))
}

#[cfg(not(feature = "rocksdb"))]
fn open_rocksdb(dir: &std::path::Path) -> Result<CollectorStorage> {
    anyhow::bail!(
        "data_dir {} requires a build with the `rocksdb` feature",
        dir.display()
    )
}

/// Bind the replication bridge and start the ingestor.
pub async fn start(
    settings: &CollectorSettings,
    storage: CollectorStorage,
    time: Arc<dyn TimeSource>,
    metrics_interval: Duration,
    shutdown: watch::Receiver<bool>,
    tasks: &mut JoinSet<()>,
) -> Result<CollectorRole> {
    let channel = InMemoryReplicationChannel::with_log(settings.channel_config(), storage.log)
        .context("Failed to reload replication channel")?;

    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind replication bridge on {}", settings.listen_addr))?;
    let local_addr = listener
        .local_addr()
        .context("Replication bridge has no local address")?;

    let credential =
        parse_credential(&settings.credential).context("Invalid collector credential")?;
    let server = ReplicationServer::new(Arc::new(channel.clone()), credential);
    tasks.spawn(server.serve(listener, shutdown.clone()));

    let config = settings.ingestor_config();
    let consumer = channel.durable_consumer(
        &config.durable_name,
        SubjectFilter::new(config.subject_filter.clone()),
    );
    let ingestor = Arc::new(EventIngestor::new(config, Arc::new(consumer), storage.ingest, time));
    tasks.spawn({
        let ingestor = Arc::clone(&ingestor);
        let shutdown = shutdown.clone();
        async move { ingestor.run(shutdown).await }
    });

    let report = {
        let ingestor = Arc::clone(&ingestor);
        let channel = channel.clone();
        move || {
            info!(
                component = "collector",
                ingest = ?ingestor.stats(),
                channel = ?channel.stats(),
                retained = channel.len(),
                "Collector metrics"
            );
        }
    };
    spawn_reporter(tasks, metrics_interval, shutdown, report);

    info!(addr = %local_addr, "Collector started");
    Ok(CollectorRole {
        channel,
        ingestor,
        local_addr,
    })
}
