//! # Shared Types Crate
//!
//! Domain entities, the mining-event envelope, template-channel wire frames
//! and the collaborator ports shared by every relay-pool crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Every type that crosses a crate boundary
//!   lives here.
//! - **Immutable Events**: A `MiningEvent` is created once and never mutated;
//!   its `EventId` is the idempotency key all the way to the persistence store.
//! - **Explicit Authority**: Work is identified by `TemplateId` (authority
//!   epoch + generation sequence), never by sequence alone.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod node;
pub mod security;
pub mod time;
pub mod wire;

pub use entities::*;
pub use envelope::{
    EventEmitter, EventEnvelope, EventId, MiningEvent, MiningEventPayload, MiningEventType,
};
pub use errors::*;
pub use node::{BlockSubmitter, LocalNode, NodeError, NodeSubmitter, SubmitAccepted, SubmitRejected};
pub use security::{RelayCredential, CHALLENGE_LEN};
pub use time::{SystemTimeSource, TimeSource};

#[cfg(any(test, feature = "test-utils"))]
pub use time::ManualTimeSource;
