//! # Event Publisher (regional)
//!
//! Turns local occurrences into [`MiningEvent`]s and pushes them to the
//! replication channel.
//!
//! `emit` only appends to a bounded queue. A single send-loop task publishes
//! the queue head and pops it once the channel has acknowledged it, so an
//! outage turns into local buffering and the backlog drains in emission
//! order before anything newer.

use crate::config::PublisherConfig;
use crate::metrics::{PublisherStats, PublisherStatsSnapshot};
use parking_lot::Mutex;
use shared_bus::{ChannelError, ReplicationChannel};
use shared_types::{EventEmitter, EventId, MiningEvent, MiningEventPayload, TimeSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "event_publisher";

struct Shared {
    config: PublisherConfig,
    channel: Arc<dyn ReplicationChannel>,
    time: Arc<dyn TimeSource>,
    boot_id: u64,
    counter: AtomicU64,
    buffer: Mutex<VecDeque<MiningEvent>>,
    notify: Notify,
    stats: PublisherStats,
}

/// Regional event publisher. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    shared: Arc<Shared>,
}

impl EventPublisher {
    /// The boot id is the current time in milliseconds, so IDs from a
    /// restarted publisher never repeat earlier ones.
    pub fn new(
        config: PublisherConfig,
        channel: Arc<dyn ReplicationChannel>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let boot_id = time.now_ms();
        Self {
            shared: Arc::new(Shared {
                config,
                channel,
                time,
                boot_id,
                counter: AtomicU64::new(0),
                buffer: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                stats: PublisherStats::default(),
            }),
        }
    }

    pub fn boot_id(&self) -> u64 {
        self.shared.boot_id
    }

    /// Events waiting to be published.
    pub fn buffered(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    pub fn stats(&self) -> PublisherStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Drain the buffer into the channel until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let shared = &self.shared;
        let mut backoff = shared.config.initial_backoff;
        let mut outage = false;

        info!(
            component = COMPONENT,
            relay_id = %shared.config.relay_id,
            region = %shared.config.region,
            boot_id = shared.boot_id,
            "Event publisher started"
        );

        loop {
            let head = shared.buffer.lock().front().cloned();
            let Some(event) = head else {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                continue;
            };

            let payload = match event.encode() {
                Ok(payload) => payload,
                Err(e) => {
                    self.drop_head(&event.event_id);
                    error!(component = COMPONENT, event_id = %event.event_id, error = %e, "Event could not be encoded; dropped");
                    continue;
                }
            };

            let dedup_key = event.event_id.to_string();
            match shared.channel.publish(&event.subject(), payload, &dedup_key).await {
                Ok(ack) => {
                    self.pop_head(&event.event_id);
                    PublisherStats::incr(&shared.stats.published);
                    backoff = shared.config.initial_backoff;
                    if outage {
                        outage = false;
                        info!(
                            component = COMPONENT,
                            backlog = self.buffered(),
                            "Replication channel reachable again; draining buffered events"
                        );
                    }
                    debug!(component = COMPONENT, event_id = %event.event_id, sequence = ack.sequence(), "Event published");
                }
                Err(ChannelError::Rejected(reason)) => {
                    self.drop_head(&event.event_id);
                    error!(component = COMPONENT, event_id = %event.event_id, reason = %reason, "Event rejected by replication channel; dropped");
                }
                Err(e) => {
                    PublisherStats::incr(&shared.stats.retries);
                    if outage {
                        debug!(component = COMPONENT, error = %e, retry_in = ?backoff, "Publish still failing");
                    } else {
                        outage = true;
                        warn!(
                            component = COMPONENT,
                            error = %e,
                            backlog = self.buffered(),
                            "Replication channel unavailable; buffering events locally"
                        );
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                    backoff = (backoff * 2).min(shared.config.max_backoff);
                }
            }
        }

        let remaining = self.buffered();
        if remaining > 0 {
            warn!(component = COMPONENT, remaining, "Event publisher stopped with unpublished events");
        } else {
            info!(component = COMPONENT, "Event publisher stopped");
        }
    }

    fn pop_head(&self, event_id: &EventId) {
        let mut buffer = self.shared.buffer.lock();
        if buffer.front().is_some_and(|e| &e.event_id == event_id) {
            buffer.pop_front();
        }
    }

    fn drop_head(&self, event_id: &EventId) {
        self.pop_head(event_id);
        PublisherStats::incr(&self.shared.stats.dropped);
    }
}

impl EventEmitter for EventPublisher {
    fn emit(&self, payload: MiningEventPayload) -> Option<EventId> {
        let shared = &self.shared;
        let counter = shared.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let event = MiningEvent {
            event_id: EventId::new(shared.config.relay_id.clone(), shared.boot_id, counter),
            region: shared.config.region.clone(),
            emitted_at_ms: shared.time.now_ms(),
            payload,
        };

        {
            let mut buffer = shared.buffer.lock();
            if buffer.len() >= shared.config.buffer_capacity {
                drop(buffer);
                PublisherStats::incr(&shared.stats.dropped);
                error!(
                    component = COMPONENT,
                    event_id = %event.event_id,
                    event_type = %event.event_type(),
                    capacity = shared.config.buffer_capacity,
                    "Event buffer full; event dropped (data loss)"
                );
                return None;
            }
            buffer.push_back(event.clone());
        }

        PublisherStats::incr(&shared.stats.emitted);
        shared.notify.notify_one();
        Some(event.event_id)
    }
}
