//! # In-Memory Replication Channel
//!
//! Retaining, single-process implementation of the replication channel.
//! The collector runs one of these and exposes it to regional publishers
//! through the TCP bridge; tests use it directly.
//!
//! ## Availability Toggle
//!
//! `set_available(false)` makes every publish and fetch fail with
//! `ChannelError::Unavailable` while keeping retained state, which is how a
//! partition is reproduced under test.
//!
//! ## Persistence
//!
//! Built with [`InMemoryReplicationChannel::with_log`], every stored
//! message is appended to a [`ChannelLog`] before the publish is
//! acknowledged, and each consumer's ack floor is recorded as it advances.
//! Reloaded messages restart their retention age at load time.

use crate::channel::{
    ChannelError, ChannelStats, Delivery, DurableConsumer, PublishAck, ReplicationChannel,
    StoredMessage,
};
use crate::dedup_window::TimeBoundedDedupWindow;
use crate::channel_log::ChannelLog;
use crate::subject::SubjectFilter;
use crate::{DEFAULT_ACK_WAIT_MS, DEFAULT_DEDUP_WINDOW_MS, DEFAULT_MAX_AGE_MS, DEFAULT_MAX_MESSAGES};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retention and delivery settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Maximum retained messages; the oldest are evicted first.
    pub max_messages: usize,
    /// Maximum retained message age.
    pub max_age: Duration,
    /// Transport dedup window.
    pub dedup_window: Duration,
    /// Redelivery timeout for unacknowledged deliveries.
    pub ack_wait: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_age: Duration::from_millis(DEFAULT_MAX_AGE_MS),
            dedup_window: Duration::from_millis(DEFAULT_DEDUP_WINDOW_MS),
            ack_wait: Duration::from_millis(DEFAULT_ACK_WAIT_MS),
        }
    }
}

struct PendingDelivery {
    redeliver_at: Instant,
    delivery_count: u32,
}

struct ConsumerState {
    filter: SubjectFilter,
    /// Lowest sequence this consumer has never been handed.
    next_seq: u64,
    /// Delivered but not yet acknowledged.
    pending: BTreeMap<u64, PendingDelivery>,
    /// Last ack floor written to the log.
    saved_floor: u64,
}

impl ConsumerState {
    /// Highest sequence with nothing unsettled at or below it.
    fn ack_floor(&self) -> u64 {
        self.pending
            .keys()
            .next()
            .map_or(self.next_seq.saturating_sub(1), |first| first - 1)
    }
}

struct ChannelState {
    /// Retained messages in sequence order, with their store time.
    messages: VecDeque<(Instant, StoredMessage)>,
    next_sequence: u64,
    dedup: TimeBoundedDedupWindow,
    consumers: HashMap<String, ConsumerState>,
    /// Ack floors reloaded from the log, for consumers not yet bound.
    floors: HashMap<String, u64>,
    available: bool,
    closed: bool,
    stats: ChannelStats,
}

struct Shared {
    state: Mutex<ChannelState>,
    notify: Notify,
    config: ChannelConfig,
    log: Option<Arc<dyn ChannelLog>>,
    started: Instant,
}

impl Shared {
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn check_open(state: &ChannelState) -> Result<(), ChannelError> {
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if !state.available {
            return Err(ChannelError::Unavailable("channel offline".to_string()));
        }
        Ok(())
    }
}

/// In-memory retaining replication channel.
#[derive(Clone)]
pub struct InMemoryReplicationChannel {
    shared: Arc<Shared>,
}

impl InMemoryReplicationChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self::build(config, None, Vec::new(), HashMap::new())
    }

    /// Channel backed by `log`, reloading whatever it already holds.
    pub fn with_log(config: ChannelConfig, log: Arc<dyn ChannelLog>) -> Result<Self, ChannelError> {
        let mut messages = log.load()?;
        messages.sort_by_key(|m| m.sequence);
        let floors: HashMap<String, u64> = log.ack_floors()?.into_iter().collect();
        debug!(
            messages = messages.len(),
            consumers = floors.len(),
            "Replication channel reloaded from log"
        );
        Ok(Self::build(config, Some(log), messages, floors))
    }

    fn build(
        config: ChannelConfig,
        log: Option<Arc<dyn ChannelLog>>,
        loaded: Vec<StoredMessage>,
        floors: HashMap<String, u64>,
    ) -> Self {
        let mut dedup = TimeBoundedDedupWindow::new(config.dedup_window.as_millis() as u64);
        let last_loaded = loaded.last().map_or(0, |m| m.sequence);
        let highest_floor = floors.values().copied().max().unwrap_or(0);
        let now = Instant::now();

        let mut messages = VecDeque::with_capacity(loaded.len());
        for message in loaded {
            dedup.record(&message.dedup_key, message.sequence, 0);
            messages.push_back((now, message));
        }

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ChannelState {
                    messages,
                    next_sequence: last_loaded.max(highest_floor) + 1,
                    dedup,
                    consumers: HashMap::new(),
                    floors,
                    available: true,
                    closed: false,
                    stats: ChannelStats::default(),
                }),
                notify: Notify::new(),
                config,
                log,
                started: now,
            }),
        }
    }

    /// Bind to the durable consumer `name`, creating it if needed.
    ///
    /// A new consumer starts just past its reloaded ack floor, or at the
    /// oldest retained message when it has none. Rebinding an existing
    /// consumer resumes its cursor and makes every unacknowledged delivery
    /// immediately eligible for redelivery.
    pub fn durable_consumer(&self, name: &str, filter: SubjectFilter) -> InMemoryConsumer {
        let mut state = self.shared.state.lock();
        let now = Instant::now();
        match state.consumers.get_mut(name) {
            Some(existing) => {
                existing.filter = filter;
                for pending in existing.pending.values_mut() {
                    pending.redeliver_at = now;
                }
                debug!(consumer = name, pending = existing.pending.len(), "Durable consumer resumed");
            }
            None => {
                let floor = state.floors.remove(name).unwrap_or(0);
                state.consumers.insert(
                    name.to_string(),
                    ConsumerState {
                        filter,
                        next_seq: floor + 1,
                        pending: BTreeMap::new(),
                        saved_floor: floor,
                    },
                );
                debug!(consumer = name, ack_floor = floor, "Durable consumer created");
            }
        }
        drop(state);
        self.shared.notify.notify_waiters();

        InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
        }
    }

    /// Simulate a partition (`false`) or its recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.shared.state.lock().available = available;
        if available {
            self.shared.notify.notify_waiters();
        }
    }

    pub fn is_available(&self) -> bool {
        self.shared.state.lock().available
    }

    /// Shut the channel down; pending fetches return `ChannelError::Closed`.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_waiters();
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.shared.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retained messages matching `filter`, in sequence order.
    pub fn retained(&self, filter: &SubjectFilter) -> Vec<StoredMessage> {
        self.shared
            .state
            .lock()
            .messages
            .iter()
            .filter(|(_, m)| filter.matches(&m.subject))
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Unacknowledged deliveries of consumer `name`.
    pub fn pending_count(&self, name: &str) -> usize {
        self.shared
            .state
            .lock()
            .consumers
            .get(name)
            .map_or(0, |c| c.pending.len())
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.state.lock().stats
    }

    fn evict(state: &mut ChannelState, shared: &Shared, now: Instant) {
        let config = &shared.config;
        let mut evicted_through = None;
        while let Some((stored_at, message)) = state.messages.front() {
            let over_count = state.messages.len() > config.max_messages;
            let too_old = now.saturating_duration_since(*stored_at) > config.max_age;
            if !over_count && !too_old {
                break;
            }
            let sequence = message.sequence;
            state.messages.pop_front();
            state.stats.evicted += 1;
            evicted_through = Some(sequence);

            for (name, consumer) in state.consumers.iter_mut() {
                if consumer.pending.remove(&sequence).is_some() || consumer.next_seq <= sequence {
                    warn!(
                        consumer = %name,
                        sequence,
                        "Retention evicted a message before it was acknowledged"
                    );
                }
            }
        }

        if let (Some(sequence), Some(log)) = (evicted_through, &shared.log) {
            if let Err(e) = log.remove_through(sequence) {
                warn!(sequence, error = %e, "Channel log eviction failed");
            }
        }
    }
}

impl Default for InMemoryReplicationChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

#[async_trait]
impl ReplicationChannel for InMemoryReplicationChannel {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        dedup_key: &str,
    ) -> Result<PublishAck, ChannelError> {
        let now_ms = self.shared.elapsed_ms();
        let ack = {
            let mut state = self.shared.state.lock();
            Shared::check_open(&state)?;

            if let Some(sequence) = state.dedup.check(dedup_key, now_ms) {
                state.stats.duplicates_dropped += 1;
                debug!(subject, dedup_key, sequence, "Duplicate publish dropped");
                return Ok(PublishAck::Duplicate { sequence });
            }

            let sequence = state.next_sequence;
            let message = StoredMessage {
                sequence,
                subject: subject.to_string(),
                dedup_key: dedup_key.to_string(),
                payload,
            };
            if let Some(log) = &self.shared.log {
                log.append(&message).map_err(|e| {
                    warn!(subject, sequence, error = %e, "Channel log append failed");
                    ChannelError::Unavailable(format!("channel log: {e}"))
                })?;
            }
            state.next_sequence += 1;
            state.messages.push_back((Instant::now(), message));
            state.dedup.record(dedup_key, sequence, now_ms);
            state.stats.stored += 1;
            Self::evict(&mut state, &self.shared, Instant::now());
            PublishAck::Stored { sequence }
        };

        self.shared.notify.notify_waiters();
        Ok(ack)
    }
}

/// Handle to a named durable consumer of an `InMemoryReplicationChannel`.
#[derive(Clone)]
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    name: String,
}

impl InMemoryConsumer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collect ready deliveries: due redeliveries first, then new messages.
    /// Returns the batch and the next instant a redelivery becomes due.
    fn collect(&self, state: &mut ChannelState, max: usize) -> (Vec<Delivery>, Option<Instant>) {
        let now = Instant::now();
        let ack_wait = self.shared.config.ack_wait;
        let ChannelState {
            messages,
            consumers,
            stats,
            ..
        } = state;

        let Some(consumer) = consumers.get_mut(&self.name) else {
            return (Vec::new(), None);
        };

        let mut batch = Vec::new();

        let due: Vec<u64> = consumer
            .pending
            .iter()
            .filter(|(_, p)| p.redeliver_at <= now)
            .map(|(seq, _)| *seq)
            .take(max)
            .collect();
        for sequence in due {
            match messages.binary_search_by_key(&sequence, |(_, m)| m.sequence) {
                Ok(index) => {
                    if let Some(pending) = consumer.pending.get_mut(&sequence) {
                        pending.delivery_count += 1;
                        pending.redeliver_at = now + ack_wait;
                        stats.redeliveries += 1;
                        batch.push(Delivery {
                            message: messages[index].1.clone(),
                            delivery_count: pending.delivery_count,
                        });
                    }
                }
                Err(_) => {
                    consumer.pending.remove(&sequence);
                }
            }
        }

        let start = messages.partition_point(|(_, m)| m.sequence < consumer.next_seq);
        for (_, message) in messages.iter().skip(start) {
            if batch.len() >= max {
                break;
            }
            consumer.next_seq = message.sequence + 1;
            if !consumer.filter.matches(&message.subject) {
                continue;
            }
            consumer.pending.insert(
                message.sequence,
                PendingDelivery {
                    redeliver_at: now + ack_wait,
                    delivery_count: 1,
                },
            );
            batch.push(Delivery {
                message: message.clone(),
                delivery_count: 1,
            });
        }

        let next_due = consumer.pending.values().map(|p| p.redeliver_at).min();
        (batch, next_due)
    }
}

#[async_trait]
impl DurableConsumer for InMemoryConsumer {
    async fn fetch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, ChannelError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.shared.state.lock();
                Shared::check_open(&state)?;
                let (batch, next_due) = self.collect(&mut state, max.max(1));
                if !batch.is_empty() {
                    return Ok(batch);
                }
                next_due
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, sequence: u64) -> Result<(), ChannelError> {
        let mut state = self.shared.state.lock();
        Shared::check_open(&state)?;
        let Some(consumer) = state.consumers.get_mut(&self.name) else {
            return Ok(());
        };
        if consumer.pending.remove(&sequence).is_none() {
            debug!(consumer = %self.name, sequence, "Ack for a delivery that is not pending");
        }

        let floor = consumer.ack_floor();
        if floor > consumer.saved_floor {
            if let Some(log) = &self.shared.log {
                // On failure the floor is retried on the next ack; a restart
                // in between only redelivers already-settled messages.
                match log.save_ack_floor(&self.name, floor) {
                    Ok(()) => consumer.saved_floor = floor,
                    Err(e) => warn!(consumer = %self.name, floor, error = %e, "Ack floor not saved"),
                }
            }
        }
        Ok(())
    }

    async fn nak(&self, sequence: u64) -> Result<(), ChannelError> {
        {
            let mut state = self.shared.state.lock();
            Shared::check_open(&state)?;
            if let Some(pending) = state
                .consumers
                .get_mut(&self.name)
                .and_then(|c| c.pending.get_mut(&sequence))
            {
                pending.redeliver_at = Instant::now();
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
