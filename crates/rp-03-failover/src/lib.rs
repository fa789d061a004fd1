//! # Failover Controller (relay side)
//!
//! Decides where a relay's templates come from.
//!
//! ```text
//!                 no primary activity for `threshold`
//!   [FOLLOWING] ─────────────────────────────────────→ [INDEPENDENT]
//!        ↑                                                   │
//!        └──── primary template with a fresh sequence ───────┘
//! ```
//!
//! - **Following**: templates pushed by the primary are applied as they
//!   arrive.
//! - **Independent**: the relay builds templates from its own node, on new
//!   blocks and at a fixed refresh interval.
//!
//! Share acceptance never stops: each transition installs the new
//! authority's template through `switch_authority`, and work from the
//! previous authority stays valid for the applier's grace window.
//!
//! The controller is the only writer of [`FailoverState`]; everyone else
//! reads [`FailoverSnapshot`]s from a watch channel.

pub mod domain;
pub mod service;

mod config;
mod error;
mod metrics;

pub use config::FailoverConfig;
pub use domain::{FailoverSignal, FailoverState, PrimaryTemplateAction, Transition};
pub use error::{FailoverError, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use service::{FailoverController, FailoverSnapshot};
