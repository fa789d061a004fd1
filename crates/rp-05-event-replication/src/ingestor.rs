//! # Event Ingestor (central)
//!
//! Drains the durable consumer into the [`IngestStore`].
//!
//! ```text
//! fetch ──► decode ──┬─ undecodable ───────────────► ack (discard)
//!                    ├─ marker present ────────────► ack (duplicate)
//!                    ├─ commit ok ─────────────────► ack
//!                    └─ store error ───────────────► nak (redeliver)
//! ```
//!
//! A delivery is acknowledged only after its row and dedup marker are
//! committed together, so a crash between commit and ack shows up as a
//! redelivery that the marker absorbs.

use crate::config::IngestorConfig;
use crate::metrics::{IngestorStats, IngestorStatsSnapshot};
use crate::store::IngestStore;
use shared_bus::{Delivery, DurableConsumer};
use shared_types::{MiningEvent, TimeSource};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "event_ingestor";

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Persisted,
    Duplicate,
    Undecodable,
    PersistFailed,
}

pub struct EventIngestor {
    config: IngestorConfig,
    consumer: Arc<dyn DurableConsumer>,
    store: Arc<dyn IngestStore>,
    time: Arc<dyn TimeSource>,
    stats: IngestorStats,
}

impl EventIngestor {
    pub fn new(
        config: IngestorConfig,
        consumer: Arc<dyn DurableConsumer>,
        store: Arc<dyn IngestStore>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            config,
            consumer,
            store,
            time,
            stats: IngestorStats::default(),
        }
    }

    pub fn stats(&self) -> IngestorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Consume until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        match self.store.event_count() {
            Ok(persisted) => info!(
                component = COMPONENT,
                durable = %self.config.durable_name,
                filter = %self.config.subject_filter,
                persisted,
                "Event ingestor started"
            ),
            Err(e) => warn!(component = COMPONENT, error = %e, "Event ingestor started; store unreadable"),
        }

        let mut gc = tokio::time::interval(self.config.marker_gc_interval);
        gc.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let pause = tokio::select! {
                fetched = self.consumer.fetch(self.config.batch_size, self.config.fetch_wait) => {
                    match fetched {
                        Ok(batch) => self.process_batch(&batch).await,
                        Err(e) => {
                            warn!(component = COMPONENT, error = %e, "Fetch from replication channel failed");
                            true
                        }
                    }
                }
                _ = gc.tick() => {
                    self.evict_expired_markers();
                    false
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    false
                }
            };

            if pause {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.error_backoff) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        info!(component = COMPONENT, stats = ?self.stats(), "Event ingestor stopped");
    }

    /// Returns `true` when anything was nak'd, so the caller backs off
    /// before the redelivery.
    async fn process_batch(&self, batch: &[Delivery]) -> bool {
        let mut failed = false;
        for delivery in batch {
            failed |= self.process(delivery).await == IngestOutcome::PersistFailed;
        }
        failed
    }

    /// Handle one delivery and settle it with the channel.
    pub async fn process(&self, delivery: &Delivery) -> IngestOutcome {
        let sequence = delivery.sequence();
        let outcome = self.persist(delivery);

        let settled = match outcome {
            IngestOutcome::PersistFailed => self.consumer.nak(sequence).await,
            _ => self.consumer.ack(sequence).await,
        };
        if let Err(e) = settled {
            // The delivery stays pending and comes back; the marker covers it.
            warn!(component = COMPONENT, sequence, error = %e, "Could not settle delivery");
        }
        outcome
    }

    fn persist(&self, delivery: &Delivery) -> IngestOutcome {
        let sequence = delivery.sequence();
        let event = match MiningEvent::decode(&delivery.message.payload) {
            Ok(event) => event,
            Err(e) => {
                IngestorStats::incr(&self.stats.decode_failures);
                warn!(
                    component = COMPONENT,
                    sequence,
                    subject = %delivery.message.subject,
                    error = %e,
                    "Undecodable event discarded"
                );
                return IngestOutcome::Undecodable;
            }
        };

        match self.store.has_marker(&event.event_id) {
            Ok(true) => {
                IngestorStats::incr(&self.stats.duplicates);
                debug!(
                    component = COMPONENT,
                    event_id = %event.event_id,
                    sequence,
                    redelivery = delivery.is_redelivery(),
                    "Duplicate event skipped"
                );
                return IngestOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => return self.persist_failed(&event, sequence, &e),
        }

        match self.store.commit(&event, self.time.now_ms()) {
            Ok(()) => {
                IngestorStats::incr(&self.stats.processed);
                debug!(
                    component = COMPONENT,
                    event_id = %event.event_id,
                    event_type = %event.event_type(),
                    region = %event.region,
                    sequence,
                    "Event persisted"
                );
                IngestOutcome::Persisted
            }
            Err(e) => self.persist_failed(&event, sequence, &e),
        }
    }

    fn persist_failed(
        &self,
        event: &MiningEvent,
        sequence: u64,
        e: &crate::error::ReplicationError,
    ) -> IngestOutcome {
        IngestorStats::incr(&self.stats.persist_failures);
        error!(
            component = COMPONENT,
            event_id = %event.event_id,
            sequence,
            error = %e,
            "Event persistence failed; requesting redelivery"
        );
        IngestOutcome::PersistFailed
    }

    fn evict_expired_markers(&self) {
        let window_ms = self.config.dedup_window.as_millis() as u64;
        let cutoff = self.time.now_ms().saturating_sub(window_ms);
        match self.store.evict_markers(cutoff) {
            Ok(0) => {}
            Ok(evicted) => debug!(component = COMPONENT, evicted, "Expired dedup markers evicted"),
            Err(e) => warn!(component = COMPONENT, error = %e, "Dedup marker eviction failed"),
        }
    }
}
