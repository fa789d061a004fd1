//! Primary role: archival-node template source feeding the relay manager.

use super::spawn_reporter;
use crate::container::{parse_credential, PrimarySettings};
use anyhow::{Context, Result};
use pool_telemetry::log_template_event;
use rp_01_relay_manager::{RelayManager, RelayManagerHandle, TemplateBroadcaster, TemplateServer};
use rp_02_template_sync::TemplateGenerator;
use shared_types::{LocalNode, NodeSubmitter, TemplateSource, TimeSource};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const COMPONENT: &str = "template_source";

/// Handles of a running primary.
pub struct PrimaryRole {
    pub manager: RelayManagerHandle,
    pub local_addr: SocketAddr,
}

/// Bind the template server and start the manager and template source.
///
/// The archival node serves both template generation and submissions
/// forwarded by relays.
pub async fn start(
    settings: &PrimarySettings,
    node: Arc<dyn LocalNode>,
    time: Arc<dyn TimeSource>,
    metrics_interval: Duration,
    shutdown: watch::Receiver<bool>,
    tasks: &mut JoinSet<()>,
) -> Result<PrimaryRole> {
    let credential =
        parse_credential(&settings.credential).context("Invalid primary credential")?;
    let config = settings.manager_config();

    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind template server on {}", settings.listen_addr))?;
    let local_addr = listener
        .local_addr()
        .context("Template server has no local address")?;

    let (manager, handle) = RelayManager::new(config.clone());
    let server = TemplateServer::new(
        handle.clone(),
        credential,
        Arc::new(NodeSubmitter::new(Arc::clone(&node))),
        config,
    );
    tasks.spawn(manager.run(shutdown.clone()));
    tasks.spawn(server.serve(listener, shutdown.clone()));

    // Sequences start at boot time in milliseconds, so a restarted primary
    // keeps producing sequences above anything relays have already seen.
    let mut generator = TemplateGenerator::new(node, Arc::clone(&time), TemplateSource::Primary);
    generator.continue_from(time.now_ms());
    tasks.spawn(run_template_source(
        generator,
        handle.clone(),
        settings.template_poll_interval,
        shutdown.clone(),
    ));

    let metrics = Arc::clone(handle.metrics());
    spawn_reporter(tasks, metrics_interval, shutdown, move || {
        info!(component = "relay_manager", metrics = ?metrics.snapshot(), "Relay manager metrics");
    });

    info!(addr = %local_addr, "Primary started");
    Ok(PrimaryRole {
        manager: handle,
        local_addr,
    })
}

/// Poll the archival node and broadcast every change of work.
pub async fn run_template_source(
    mut generator: TemplateGenerator,
    broadcaster: RelayManagerHandle,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut node_down = false;

    info!(component = COMPONENT, first_sequence = generator.next_sequence(), "Template source started");

    loop {
        tokio::select! {
            _ = poll.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match generator.poll().await {
            Ok(Some(template)) => {
                if node_down {
                    node_down = false;
                    info!(component = COMPONENT, "Archival node reachable again");
                }
                let sequence = template.sequence;
                let height = template.height;
                if let Err(e) = broadcaster.broadcast_template(template).await {
                    warn!(component = COMPONENT, error = %e, "Relay manager gone; stopping template source");
                    break;
                }
                log_template_event!(info, COMPONENT, "New template broadcast", sequence, height = height);
            }
            Ok(None) => debug!(component = COMPONENT, "Node work unchanged"),
            Err(e) if node_down => debug!(component = COMPONENT, error = %e, "Archival node still failing"),
            Err(e) => {
                node_down = true;
                warn!(component = COMPONENT, error = %e, "Archival node template request failed");
            }
        }
    }

    info!(component = COMPONENT, "Template source stopped");
}
