//! Relay role: follows the primary, fails over to the local node, races
//! block submissions and publishes mining events.
//!
//! ```text
//! TemplateChannelClient ──ChannelEvent──► FailoverController ──► TemplateApplier
//!        │                                      │                     │
//!        └─ RemoteSubmitter ─┐          TemplateGenerator(local)    WorkView
//!                            ▼                                         │
//!   NodeSubmitter ──► DualSubmissionRace ◄──── ShareIntake ◄───────────┘
//!                            │                     │
//!                            └──── EventPublisher ◄┘ ──► ReplicationChannel
//! ```

use super::spawn_reporter;
use crate::container::{parse_credential, RelaySettings};
use crate::share_intake::{watch_network_blocks, ShareIntake};
use anyhow::{Context, Result};
use rp_02_template_sync::{TemplateApplier, TemplateChannelClient, TemplateGenerator};
use rp_03_failover::{FailoverController, FailoverSnapshot};
use rp_04_block_submission::{DualSubmissionRace, InMemoryCandidateArchive};
use rp_05_event_replication::EventPublisher;
use shared_bus::ReplicationChannel;
use shared_types::{EventEmitter, LocalNode, NodeSubmitter, TemplateSource, TimeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::info;

/// Channel events buffered between the template client and the controller.
const CHANNEL_EVENT_QUEUE: usize = 256;

/// Handles of a running relay.
pub struct RelayRole {
    pub intake: ShareIntake,
    pub applier: Arc<TemplateApplier>,
    pub failover: watch::Receiver<FailoverSnapshot>,
    pub publisher: EventPublisher,
}

/// Build and spawn every relay task.
pub fn start(
    settings: &RelaySettings,
    node: Arc<dyn LocalNode>,
    channel: Arc<dyn ReplicationChannel>,
    time: Arc<dyn TimeSource>,
    metrics_interval: Duration,
    shutdown: watch::Receiver<bool>,
    tasks: &mut JoinSet<()>,
) -> Result<RelayRole> {
    let credential = parse_credential(&settings.credential).context("Invalid relay credential")?;

    let applier = Arc::new(TemplateApplier::new(settings.applier_config()));

    let (events_tx, events_rx) = mpsc::channel(CHANNEL_EVENT_QUEUE);
    let client = TemplateChannelClient::new(settings.channel_client_config(), credential, events_tx);
    let remote = Arc::new(client.remote_submitter());

    let generator = TemplateGenerator::new(Arc::clone(&node), Arc::clone(&time), TemplateSource::Local);
    let controller = FailoverController::new(
        settings.failover_config(),
        Arc::clone(&applier),
        generator,
        events_rx,
    );
    let failover = controller.subscribe();
    let failover_metrics = controller.metrics();

    let publisher = EventPublisher::new(settings.publisher_config(), channel, Arc::clone(&time));
    let emitter: Arc<dyn EventEmitter> = Arc::new(publisher.clone());

    let race = DualSubmissionRace::new(
        settings.race_config(),
        Arc::new(NodeSubmitter::new(node)),
        remote,
        Arc::new(InMemoryCandidateArchive::default()),
        Arc::clone(&emitter),
    );

    let intake = ShareIntake::new(
        settings.relay_id(),
        applier.work_view(),
        race.clone(),
        Arc::clone(&emitter),
        time,
    );

    tasks.spawn(client.run(shutdown.clone()));
    tasks.spawn(controller.run(shutdown.clone()));
    tasks.spawn(publisher.clone().run(shutdown.clone()));
    tasks.spawn(watch_network_blocks(applier.work_view(), emitter, shutdown.clone()));

    let report = {
        let applier = Arc::clone(&applier);
        let publisher = publisher.clone();
        let failover = failover.clone();
        move || {
            let snapshot = failover.borrow().clone();
            info!(
                component = "relay",
                mode = %snapshot.mode,
                channel_connected = snapshot.channel_connected,
                current = ?snapshot.current,
                template_sync = ?applier.metrics().snapshot(),
                failover = ?failover_metrics.snapshot(),
                submission = ?race.metrics().snapshot(),
                events = ?publisher.stats(),
                buffered_events = publisher.buffered(),
                "Relay metrics"
            );
        }
    };
    spawn_reporter(tasks, metrics_interval, shutdown, report);

    info!(
        relay_id = %settings.relay_id,
        region = %settings.region,
        primary = %settings.primary_addr,
        collector = %settings.collector_addr,
        "Relay started"
    );

    Ok(RelayRole {
        intake,
        applier,
        failover,
        publisher,
    })
}
