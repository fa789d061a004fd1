//! # Pool Runtime
//!
//! Wires the relay-pool crates into a process for one of three roles.
//!
//! ```text
//!            ┌────────────── primary ──────────────┐
//!            │ archival node ─► TemplateGenerator  │
//!            │        ▲             │ broadcast    │
//!            │        │ submit      ▼              │
//!            │   TemplateServer ◄─ RelayManager    │
//!            └────────┬────────────────────────────┘
//!                     │ template channel (TCP)
//!            ┌────────┴──────── relay (per region) ─┐
//!            │ client ─► failover ─► applier        │
//!            │ share intake ─► race ─► publisher    │
//!            └────────┬─────────────────────────────┘
//!                     │ replication bridge (TCP)
//!            ┌────────┴──────── collector ──────────┐
//!            │ channel ─► ingestor ─► ingest store  │
//!            └──────────────────────────────────────┘
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (file + `RP_*` environment)
//! 2. Validate it; an invalid configuration aborts startup
//! 3. Build the role's components and spawn their tasks
//! 4. Run until Ctrl+C, then signal shutdown and drain tasks

pub mod adapters;
pub mod container;
pub mod share_intake;
pub mod wiring;

use anyhow::{Context, Result};
use container::{Mode, PoolConfig};
use shared_bus::TcpReplicationChannel;
use shared_types::{LocalNode, SystemTimeSource, TimeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub use adapters::BitcoindNode;
pub use share_intake::{IntakeError, ShareIntake, SolvedBlock};
pub use wiring::{CollectorRole, CollectorStorage, PrimaryRole, RelayRole};

/// How long shutdown waits for tasks to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handles of whichever role is running.
pub enum RoleHandles {
    Primary(PrimaryRole),
    Relay(RelayRole),
    Collector(CollectorRole),
}

/// The process runtime: spawned tasks plus the shutdown signal.
pub struct PoolRuntime {
    config: PoolConfig,
    tasks: JoinSet<()>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PoolRuntime {
    pub fn new(config: PoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            tasks: JoinSet::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Build the configured role and spawn its tasks.
    pub async fn start(&mut self) -> Result<RoleHandles> {
        let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
        let metrics_interval = self.config.metrics_interval;
        let shutdown = self.shutdown_rx.clone();

        info!(role = self.config.mode.name(), "Starting pool runtime");

        match &self.config.mode {
            Mode::Primary(settings) => {
                let node = self.local_node().await?;
                let role = wiring::primary::start(
                    settings,
                    node,
                    time,
                    metrics_interval,
                    shutdown,
                    &mut self.tasks,
                )
                .await?;
                Ok(RoleHandles::Primary(role))
            }
            Mode::Relay(settings) => {
                let node = self.local_node().await?;
                let identity = settings
                    .bridge_identity()
                    .context("Invalid relay credential")?;
                let channel = Arc::new(TcpReplicationChannel::new(
                    settings.collector_addr.clone(),
                    settings.publish_timeout,
                    identity,
                ));
                let role = wiring::relay::start(
                    settings,
                    node,
                    channel,
                    time,
                    metrics_interval,
                    shutdown,
                    &mut self.tasks,
                )?;
                Ok(RoleHandles::Relay(role))
            }
            Mode::Collector(settings) => {
                let storage = wiring::open_store(settings)?;
                let role = wiring::collector::start(
                    settings,
                    storage,
                    time,
                    metrics_interval,
                    shutdown,
                    &mut self.tasks,
                )
                .await?;
                Ok(RoleHandles::Collector(role))
            }
        }
    }

    /// Connect the node client and check that it answers. An unreachable node is not
    /// fatal: the relay fails over, the primary retries.
    async fn local_node(&self) -> Result<Arc<dyn LocalNode>> {
        let node = BitcoindNode::new(self.config.node.clone()).context("Failed to build node RPC client")?;
        match node.best_block_hash().await {
            Ok(tip) => info!(url = %node.url(), tip = %tip, "Node reachable"),
            Err(e) => warn!(url = %node.url(), error = %e, "Node not reachable at startup"),
        }
        Ok(Arc::new(node))
    }

    /// Signal shutdown and wait for tasks to drain.
    pub async fn shutdown(mut self) {
        info!("Initiating graceful shutdown...");

        if self.shutdown_tx.send(true).is_err() {
            warn!("No task was listening for shutdown");
        }

        let drain = async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Task ended abnormally");
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(remaining = self.tasks.len(), "Tasks still running after grace period; aborting");
            self.tasks.abort_all();
        }

        info!("Shutdown complete");
    }
}
