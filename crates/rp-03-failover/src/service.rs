//! # Failover Controller Service
//!
//! Task that consumes [`ChannelEvent`]s, owns the [`FailoverState`] and
//! drives the template applier and the local template generator.

use crate::config::FailoverConfig;
use crate::domain::{FailoverSignal, FailoverState, PrimaryTemplateAction, Transition};
use crate::error::{FailoverError, Result};
use crate::metrics::Metrics;
use pool_telemetry::log_template_event;
use rp_02_template_sync::{ChannelEvent, TemplateApplier, TemplateGenerator};
use shared_types::{BlockTemplate, FailoverMode, TemplateId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMPONENT: &str = "failover_controller";

/// Read-only view of the failover state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverSnapshot {
    pub mode: FailoverMode,
    pub channel_connected: bool,
    pub missed_heartbeats: u32,
    pub current: Option<TemplateId>,
    pub last_template_at: Option<Instant>,
    pub last_transition_at: Option<Instant>,
}

/// Relay-side failover controller.
pub struct FailoverController {
    config: FailoverConfig,
    applier: Arc<TemplateApplier>,
    generator: TemplateGenerator,
    events: mpsc::Receiver<ChannelEvent>,
    state: FailoverState,
    snapshot_tx: watch::Sender<FailoverSnapshot>,
    metrics: Arc<Metrics>,
    channel_connected: bool,
    /// A local template was installed since going independent.
    local_installed: bool,
    /// The local node is failing; cleared on the next good poll.
    local_outage: bool,
}

impl FailoverController {
    pub fn new(
        config: FailoverConfig,
        applier: Arc<TemplateApplier>,
        generator: TemplateGenerator,
        events: mpsc::Receiver<ChannelEvent>,
    ) -> Self {
        let state = FailoverState::new(Instant::now());
        let (snapshot_tx, _rx) = watch::channel(FailoverSnapshot {
            mode: state.mode(),
            channel_connected: false,
            missed_heartbeats: 0,
            current: applier.current_id(),
            last_template_at: None,
            last_transition_at: None,
        });
        Self {
            config,
            applier,
            generator,
            events,
            state,
            snapshot_tx,
            metrics: Arc::new(Metrics::new()),
            channel_connected: false,
            local_installed: false,
            local_outage: false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FailoverSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut check = tokio::time::interval(self.config.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = tokio::time::interval(self.config.local_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh = tokio::time::interval(self.config.local_refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        info!(
            component = COMPONENT,
            threshold = ?self.config.threshold,
            "Failover controller started in following mode"
        );

        loop {
            tokio::select! {
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.on_channel_event(event),
                    None => {
                        let err = FailoverError::EventsClosed;
                        warn!(component = COMPONENT, error = %err, "Primary can no longer be followed");
                        events_open = false;
                    }
                },
                _ = check.tick() => {
                    if let Some(Transition::WentIndependent) =
                        self.state.evaluate(Instant::now(), self.config.threshold)
                    {
                        self.go_independent().await;
                        poll.reset();
                        refresh.reset();
                    }
                }
                _ = poll.tick(), if self.state.is_independent() => {
                    self.refresh_local(false).await;
                }
                _ = refresh.tick(), if self.state.is_independent() => {
                    self.refresh_local(true).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(component = COMPONENT, mode = %self.state.mode(), "Failover controller stopping");
                        break;
                    }
                }
            }
            self.publish();
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        let now = Instant::now();
        match event {
            ChannelEvent::Connected => {
                self.channel_connected = true;
                self.state.observe(FailoverSignal::PrimaryActivity, now);
            }
            ChannelEvent::HeartbeatAcked => {
                self.state.observe(FailoverSignal::PrimaryActivity, now);
            }
            ChannelEvent::HeartbeatMissed => {
                Metrics::incr(&self.metrics.heartbeats_missed);
                self.state.observe(FailoverSignal::HeartbeatMissed, now);
                debug!(
                    component = COMPONENT,
                    missed = self.state.missed_heartbeats(),
                    "Primary heartbeat unanswered"
                );
            }
            ChannelEvent::Disconnected { reason } => {
                self.channel_connected = false;
                self.state.observe(FailoverSignal::ChannelDown, now);
                debug!(component = COMPONENT, reason = %reason, "Template channel down");
            }
            ChannelEvent::AuthRejected { .. } => {
                self.channel_connected = false;
            }
            ChannelEvent::Template(template) => self.on_primary_template(template, now),
        }
    }

    fn on_primary_template(&mut self, template: BlockTemplate, now: Instant) {
        if !template.is_well_formed() {
            self.state.observe(FailoverSignal::PrimaryActivity, now);
            warn!(
                component = COMPONENT,
                sequence = template.sequence,
                "Malformed primary template discarded"
            );
            return;
        }

        let sequence = template.sequence;
        match self.state.on_primary_template(sequence, now) {
            PrimaryTemplateAction::Apply => {
                Metrics::incr(&self.metrics.primary_templates);
                if self.applier.apply_template(template).is_ok() {
                    self.state.record_applied(now);
                }
            }
            PrimaryTemplateAction::Resume => {
                Metrics::incr(&self.metrics.primary_templates);
                Metrics::incr(&self.metrics.resumed_following);
                self.local_installed = false;
                self.local_outage = false;
                match self.applier.switch_authority(template) {
                    Ok(id) => {
                        self.state.record_applied(now);
                        log_template_event!(
                            info,
                            COMPONENT,
                            "Primary reachable again; following primary templates",
                            id
                        );
                    }
                    Err(e) => warn!(component = COMPONENT, error = %e, "Could not adopt primary template"),
                }
            }
            PrimaryTemplateAction::Ignore => {
                Metrics::incr(&self.metrics.primary_templates_ignored);
                debug!(
                    component = COMPONENT,
                    sequence,
                    highest = self.state.highest_primary_sequence(),
                    "Primary template not fresh; staying independent"
                );
            }
        }
    }

    async fn go_independent(&mut self) {
        Metrics::incr(&self.metrics.went_independent);
        warn!(
            component = COMPONENT,
            silence = ?self.state.silence(Instant::now()),
            missed_heartbeats = self.state.missed_heartbeats(),
            "Primary silent past threshold; switching to local templates"
        );

        let last_applied = self.applier.current_id().map(|id| id.sequence).unwrap_or(0);
        self.generator.continue_from(last_applied);
        self.local_installed = false;
        self.refresh_local(true).await;
    }

    /// Build a local template and install it.
    ///
    /// While the node is down the last installed template keeps serving;
    /// the failure is warned once per outage.
    async fn refresh_local(&mut self, force: bool) {
        match self.next_local_template(force).await {
            Ok(()) => {
                if self.local_outage {
                    self.local_outage = false;
                    info!(component = COMPONENT, "Local node answering again");
                }
            }
            Err(e) if e.is_local_node_failure() => {
                Metrics::incr(&self.metrics.local_node_failures);
                if self.local_outage {
                    debug!(component = COMPONENT, error = %e, "Local node still failing");
                } else {
                    self.local_outage = true;
                    warn!(
                        component = COMPONENT,
                        error = %e,
                        current = ?self.applier.current_id(),
                        "Local node failing while independent; serving last known template"
                    );
                }
            }
            Err(e) => warn!(component = COMPONENT, error = %e, "Local template rejected"),
        }
    }

    async fn next_local_template(&mut self, force: bool) -> Result<()> {
        let template = if force || !self.local_installed {
            self.generator.generate().await?
        } else {
            match self.generator.poll().await? {
                Some(template) => template,
                None => return Ok(()),
            }
        };

        let id = if self.local_installed {
            self.applier.apply_template(template)?
        } else {
            self.applier.switch_authority(template)?
        };
        self.local_installed = true;
        self.state.record_applied(Instant::now());
        Metrics::incr(&self.metrics.local_templates);
        log_template_event!(debug, COMPONENT, "Local template installed", id);
        Ok(())
    }

    fn publish(&self) {
        let next = FailoverSnapshot {
            mode: self.state.mode(),
            channel_connected: self.channel_connected,
            missed_heartbeats: self.state.missed_heartbeats(),
            current: self.applier.current_id(),
            last_template_at: self.state.last_template_at(),
            last_transition_at: self.state.last_transition_at(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
