//! # Relay Connection Manager (primary side)
//!
//! Accepts relay connections, authenticates them with the shared credential,
//! tracks their health and fans every new block template out to them.
//!
//! ## Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Adapters                                           │
//! │  - TemplateServer: TCP listener, handshake, one     │
//! │    reader + one writer task per relay connection    │
//! └─────────────────────────────────────────────────────┘
//!                         │ ManagerCommand
//! ┌─────────────────────────────────────────────────────┐
//! │  Service                                            │
//! │  - RelayManager: single task owning the registry    │
//! │  - RelayManagerHandle: cloneable message sender     │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Domain (pure)                                      │
//! │  - RelayRegistration, HealthPolicy                  │
//! │  - DeliveryTracker (ack / resend bookkeeping)       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! 1. **Broadcast Targets**: templates go to `healthy` and `degraded` relays,
//!    never to `unreachable` ones.
//! 2. **Generation Order**: each relay receives templates in increasing
//!    sequence order.
//! 3. **Isolation**: a slow or failing relay never delays delivery to the
//!    others. Outbound queues are bounded and written with `try_send`.
//! 4. **Authentication**: a relay that fails the challenge is never
//!    registered.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

mod config;
mod error;
mod metrics;

pub use adapters::TemplateServer;
pub use config::ManagerConfig;
pub use domain::{AckOutcome, DeliveryTracker, HealthPolicy, RelayRegistration, RelayStatus};
pub use error::{ManagerError, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ports::TemplateBroadcaster;
pub use service::{ManagerCommand, RegistrationTicket, RelayManager, RelayManagerHandle};
