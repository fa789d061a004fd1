//! # Shared Bus - Durable Replication Channel
//!
//! At-least-once, subject-addressed publish/subscribe used to carry mining
//! events from every region to the central collector.
//!
//! ## Delivery Model
//!
//! ```text
//! ┌──────────────┐  publish(subject,     ┌──────────────────┐
//! │ Regional     │  payload, dedup_key)  │  Replication     │
//! │ Publisher    │ ────────────────────► │  Channel         │
//! └──────────────┘                       │  (retained log)  │
//!                                        └────────┬─────────┘
//!                                                 │ fetch / ack / nak
//!                                                 ▼
//!                                        ┌──────────────────┐
//!                                        │ Durable Consumer │
//!                                        │ (named cursor)   │
//!                                        └──────────────────┘
//! ```
//!
//! - **Retention:** messages are kept (bounded by count and age) until
//!   evicted, independent of consumers.
//! - **Durable Consumers:** cursor state lives with the channel under a
//!   name, so a consumer that reconnects resumes where it left off. With a
//!   `ChannelLog` the retained messages and each consumer's ack floor
//!   also survive a process restart.
//! - **Redelivery:** a delivery not acked within `ack_wait` (or nak'd) is
//!   delivered again.
//! - **Transport Dedup:** a publish repeating a dedup key inside the dedup
//!   window is acknowledged but not stored again. This is an optimization;
//!   consumers must still deduplicate.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bridge;
pub mod channel;
pub mod channel_log;
pub mod dedup_window;
pub mod memory;
pub mod subject;

pub use bridge::{BridgeIdentity, ReplicationServer, TcpReplicationChannel};
pub use channel::{
    ChannelError, ChannelStats, Delivery, DurableConsumer, PublishAck, ReplicationChannel,
    StoredMessage,
};
pub use channel_log::{ChannelLog, InMemoryChannelLog};
pub use dedup_window::TimeBoundedDedupWindow;
pub use memory::{ChannelConfig, InMemoryConsumer, InMemoryReplicationChannel};
pub use subject::SubjectFilter;

/// Default transport dedup window (milliseconds).
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 2 * 60 * 1000;

/// Default redelivery timeout for unacknowledged deliveries (milliseconds).
pub const DEFAULT_ACK_WAIT_MS: u64 = 30_000;

/// Default retention bound on stored messages.
pub const DEFAULT_MAX_MESSAGES: usize = 1_000_000;

/// Default retention bound on message age (milliseconds).
pub const DEFAULT_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1000;
