//! # Relay Manager Service
//!
//! A single task owns the relay registry. Connection tasks and the template
//! source talk to it through [`RelayManagerHandle`].
//!
//! ## Delivery
//!
//! Each registration has a bounded outbound queue drained by its
//! connection's writer task. The manager only ever `try_send`s into it:
//!
//! - queue has room → template is sent, tracker records it
//! - queue full → template stays pending, retried with exponential backoff
//!   capped at `max_backoff`
//! - no ack for the latest template within `ack_timeout` → the full latest
//!   template is queued again

use crate::config::ManagerConfig;
use crate::domain::{AckOutcome, DeliveryTracker, HealthPolicy, RelayRegistration, RelayStatus};
use crate::error::{ManagerError, Result};
use crate::metrics::Metrics;
use crate::ports::TemplateBroadcaster;
use async_trait::async_trait;
use pool_telemetry::log_relay_event;
use shared_types::wire::PrimaryFrame;
use shared_types::{BlockTemplate, HealthState, Region, RelayId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMPONENT: &str = "relay_manager";

/// Messages accepted by the manager task.
#[derive(Debug)]
pub enum ManagerCommand {
    Register {
        relay_id: RelayId,
        region: Region,
        outbound: mpsc::Sender<PrimaryFrame>,
        reply: oneshot::Sender<RegistrationTicket>,
    },
    Heartbeat {
        relay_id: RelayId,
        connection_id: u64,
    },
    Ack {
        relay_id: RelayId,
        connection_id: u64,
        sequence: u64,
    },
    Disconnected {
        relay_id: RelayId,
        connection_id: u64,
    },
    Broadcast {
        template: BlockTemplate,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<RelayStatus>>,
    },
}

/// Returned to a connection on registration.
#[derive(Debug)]
pub struct RegistrationTicket {
    pub connection_id: u64,
    /// Resolves when the manager evicts this connection (unreachable, or
    /// replaced by a newer connection of the same relay).
    pub evicted: oneshot::Receiver<()>,
}

struct RelayEntry {
    registration: RelayRegistration,
    outbound: Option<mpsc::Sender<PrimaryFrame>>,
    evict: Option<oneshot::Sender<()>>,
    tracker: DeliveryTracker,
    pending: VecDeque<BlockTemplate>,
    backoff: Duration,
    next_attempt: Instant,
}

impl RelayEntry {
    fn status(&self) -> RelayStatus {
        RelayStatus {
            relay_id: self.registration.relay_id.clone(),
            region: self.registration.region.clone(),
            authenticated: self.registration.authenticated,
            health: self.registration.health,
            missed_heartbeats: self.registration.missed_heartbeats,
            acked_sequence: self.tracker.acked_sequence(),
            last_sent_sequence: self.tracker.last_sent_sequence(),
            pending_templates: self.pending.len(),
        }
    }

    fn evict(&mut self) {
        self.outbound = None;
        self.pending.clear();
        if let Some(evict) = self.evict.take() {
            let _ = evict.send(());
        }
    }
}

/// Cloneable handle to the manager task.
#[derive(Clone)]
pub struct RelayManagerHandle {
    tx: mpsc::Sender<ManagerCommand>,
    metrics: Arc<Metrics>,
}

impl RelayManagerHandle {
    async fn send(&self, command: ManagerCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ManagerError::ManagerStopped)
    }

    /// Register an authenticated relay whose writer drains `outbound`.
    pub async fn register(
        &self,
        relay_id: RelayId,
        region: Region,
        outbound: mpsc::Sender<PrimaryFrame>,
    ) -> Result<RegistrationTicket> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Register {
            relay_id,
            region,
            outbound,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ManagerError::ManagerStopped)
    }

    pub async fn heartbeat(&self, relay_id: RelayId, connection_id: u64) -> Result<()> {
        self.send(ManagerCommand::Heartbeat {
            relay_id,
            connection_id,
        })
        .await
    }

    pub async fn ack(&self, relay_id: RelayId, connection_id: u64, sequence: u64) -> Result<()> {
        self.send(ManagerCommand::Ack {
            relay_id,
            connection_id,
            sequence,
        })
        .await
    }

    pub async fn disconnected(&self, relay_id: RelayId, connection_id: u64) -> Result<()> {
        self.send(ManagerCommand::Disconnected {
            relay_id,
            connection_id,
        })
        .await
    }

    /// All registrations, for operators and tests.
    pub async fn snapshot(&self) -> Result<Vec<RelayStatus>> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| ManagerError::ManagerStopped)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

#[async_trait]
impl TemplateBroadcaster for RelayManagerHandle {
    async fn broadcast_template(&self, template: BlockTemplate) -> Result<()> {
        self.send(ManagerCommand::Broadcast { template }).await
    }
}

/// The manager task state.
pub struct RelayManager {
    config: ManagerConfig,
    policy: HealthPolicy,
    relays: HashMap<RelayId, RelayEntry>,
    latest: Option<BlockTemplate>,
    next_connection_id: u64,
    rx: mpsc::Receiver<ManagerCommand>,
    metrics: Arc<Metrics>,
}

impl RelayManager {
    /// Create the manager and its handle. Drive it with [`RelayManager::run`].
    pub fn new(config: ManagerConfig) -> (Self, RelayManagerHandle) {
        let (tx, rx) = mpsc::channel(1024);
        let metrics = Arc::new(Metrics::new());
        let manager = Self {
            policy: config.health_policy(),
            config,
            relays: HashMap::new(),
            latest: None,
            next_connection_id: 1,
            rx,
            metrics: Arc::clone(&metrics),
        };
        (manager, RelayManagerHandle { tx, metrics })
    }

    /// Run until `shutdown` flips to `true` or every handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            heartbeat_ms = self.config.heartbeat_interval.as_millis() as u64,
            "Relay manager started"
        );

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command, Instant::now()),
                    None => break,
                },
                _ = tick.tick() => self.housekeeping(Instant::now()),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for entry in self.relays.values_mut() {
            entry.evict();
        }
        info!("Relay manager stopped");
    }

    fn handle_command(&mut self, command: ManagerCommand, now: Instant) {
        self.evaluate_health(now);
        match command {
            ManagerCommand::Register {
                relay_id,
                region,
                outbound,
                reply,
            } => {
                let ticket = self.register(relay_id, region, outbound, now);
                let _ = reply.send(ticket);
            }
            ManagerCommand::Heartbeat {
                relay_id,
                connection_id,
            } => {
                if let Some(entry) = self.entry_mut(&relay_id, connection_id) {
                    if let Some(HealthState::Healthy) = entry.registration.record_heartbeat(now) {
                        log_relay_event!(info, COMPONENT, "Relay healthy again", relay_id);
                    }
                }
            }
            ManagerCommand::Ack {
                relay_id,
                connection_id,
                sequence,
            } => {
                if let Some(entry) = self.entry_mut(&relay_id, connection_id) {
                    match entry.tracker.record_ack(sequence) {
                        AckOutcome::Advanced => {
                            debug!(relay_id = %relay_id, sequence, "Template acknowledged")
                        }
                        AckOutcome::Stale => {}
                        AckOutcome::Unknown => log_relay_event!(
                            warn,
                            COMPONENT,
                            "Ack for a sequence never sent; ignoring",
                            relay_id,
                            sequence
                        ),
                    }
                }
            }
            ManagerCommand::Disconnected {
                relay_id,
                connection_id,
            } => {
                let current = self
                    .relays
                    .get(&relay_id)
                    .is_some_and(|e| e.registration.connection_id == connection_id);
                if current {
                    self.relays.remove(&relay_id);
                    log_relay_event!(info, COMPONENT, "Relay deregistered", relay_id);
                }
            }
            ManagerCommand::Broadcast { template } => self.broadcast(template, now),
            ManagerCommand::Snapshot { reply } => {
                let mut statuses: Vec<RelayStatus> =
                    self.relays.values().map(RelayEntry::status).collect();
                statuses.sort_by(|a, b| a.relay_id.cmp(&b.relay_id));
                let _ = reply.send(statuses);
            }
        }
    }

    fn entry_mut(&mut self, relay_id: &RelayId, connection_id: u64) -> Option<&mut RelayEntry> {
        self.relays
            .get_mut(relay_id)
            .filter(|e| e.registration.connection_id == connection_id)
    }

    fn register(
        &mut self,
        relay_id: RelayId,
        region: Region,
        outbound: mpsc::Sender<PrimaryFrame>,
        now: Instant,
    ) -> RegistrationTicket {
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;
        let (evict_tx, evict_rx) = oneshot::channel();

        if let Some(mut previous) = self.relays.remove(&relay_id) {
            log_relay_event!(
                info,
                COMPONENT,
                "Relay reconnected; replacing previous connection",
                relay_id,
                previous_connection = previous.registration.connection_id
            );
            previous.evict();
        }

        let mut entry = RelayEntry {
            registration: RelayRegistration::new(relay_id.clone(), region.clone(), connection_id, now),
            outbound: Some(outbound),
            evict: Some(evict_tx),
            tracker: DeliveryTracker::new(),
            pending: VecDeque::new(),
            backoff: self.config.initial_backoff,
            next_attempt: now,
        };
        if let Some(latest) = &self.latest {
            entry.pending.push_back(latest.clone());
        }
        Self::flush(&mut entry, &self.config, &self.metrics, now);
        self.relays.insert(relay_id.clone(), entry);

        Metrics::incr(&self.metrics.relays_registered);
        log_relay_event!(info, COMPONENT, "Relay registered", relay_id, region = %region, connection_id);

        RegistrationTicket {
            connection_id,
            evicted: evict_rx,
        }
    }

    fn broadcast(&mut self, template: BlockTemplate, now: Instant) {
        if let Some(latest) = &self.latest {
            if template.sequence <= latest.sequence {
                warn!(
                    sequence = template.sequence,
                    latest = latest.sequence,
                    "Template out of generation order; not broadcast"
                );
                return;
            }
        }

        Metrics::incr(&self.metrics.templates_broadcast);
        let mut targets = 0usize;
        for entry in self.relays.values_mut() {
            if !entry.registration.health.is_broadcast_target() || entry.outbound.is_none() {
                continue;
            }
            targets += 1;
            entry.pending.push_back(template.clone());
            while entry.pending.len() > self.config.max_pending_templates {
                if let Some(dropped) = entry.pending.pop_front() {
                    log_relay_event!(
                        warn,
                        COMPONENT,
                        "Relay backlog full; superseded template skipped",
                        entry.registration.relay_id,
                        sequence = dropped.sequence
                    );
                }
            }
            if now >= entry.next_attempt {
                Self::flush(entry, &self.config, &self.metrics, now);
            }
        }

        debug!(sequence = template.sequence, targets, "Template broadcast");
        self.latest = Some(template);
    }

    /// Push pending templates into the relay's queue without waiting.
    fn flush(entry: &mut RelayEntry, config: &ManagerConfig, metrics: &Metrics, now: Instant) {
        let Some(outbound) = entry.outbound.clone() else {
            entry.pending.clear();
            return;
        };

        while let Some(template) = entry.pending.front() {
            let sequence = template.sequence;
            match outbound.try_send(PrimaryFrame::Template(template.clone())) {
                Ok(()) => {
                    entry.pending.pop_front();
                    entry.tracker.record_sent(sequence, now);
                    entry.backoff = config.initial_backoff;
                    entry.next_attempt = now;
                    Metrics::incr(&metrics.deliveries);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.next_attempt = now + entry.backoff;
                    entry.backoff = (entry.backoff * 2).min(config.max_backoff);
                    Metrics::incr(&metrics.delivery_retries);
                    debug!(
                        relay_id = %entry.registration.relay_id,
                        sequence,
                        retry_in_ms = entry.next_attempt.saturating_duration_since(now).as_millis() as u64,
                        "Relay queue full; delivery deferred"
                    );
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    entry.outbound = None;
                    entry.pending.clear();
                    break;
                }
            }
        }
    }

    fn evaluate_health(&mut self, now: Instant) {
        for entry in self.relays.values_mut() {
            match entry.registration.evaluate(&self.policy, now) {
                Some(HealthState::Degraded) => log_relay_event!(
                    warn,
                    COMPONENT,
                    "Relay degraded",
                    entry.registration.relay_id,
                    missed = entry.registration.missed_heartbeats
                ),
                Some(HealthState::Unreachable) => {
                    log_relay_event!(
                        warn,
                        COMPONENT,
                        "Relay unreachable; removed from broadcast targets",
                        entry.registration.relay_id,
                        missed = entry.registration.missed_heartbeats
                    );
                    entry.evict();
                    Metrics::incr(&self.metrics.evictions);
                }
                Some(HealthState::Healthy) | None => {}
            }
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        self.evaluate_health(now);

        for entry in self.relays.values_mut() {
            if !entry.registration.health.is_broadcast_target() || entry.outbound.is_none() {
                continue;
            }
            if entry.pending.is_empty() && entry.tracker.needs_resend(now, self.config.ack_timeout) {
                if let Some(latest) = &self.latest {
                    log_relay_event!(
                        debug,
                        COMPONENT,
                        "Latest template unacknowledged; resending in full",
                        entry.registration.relay_id,
                        sequence = latest.sequence,
                        acked = entry.tracker.acked_sequence()
                    );
                    entry.pending.push_back(latest.clone());
                    Metrics::incr(&self.metrics.resends);
                }
            }
            if !entry.pending.is_empty() && now >= entry.next_attempt {
                Self::flush(entry, &self.config, &self.metrics, now);
            }
        }
    }
}
