//! # Template Sync (relay side)
//!
//! Everything a relay needs to hold current work:
//!
//! - [`TemplateApplier`]: single writer that installs templates atomically
//! - [`WorkView`]: lock-free reader handle used by share processing
//! - [`TemplateGenerator`]: turns node work into sequenced templates
//! - [`TemplateChannelClient`]: persistent connection to the primary
//!
//! ## Atomic Swap
//!
//! ```text
//!  apply_template(t)
//!        │
//!        ▼
//!  ┌──────────────┐  send_replace   ┌───────────────────────────┐
//!  │  Applier     │ ──────────────► │ watch<Arc<ActiveWork>>    │
//!  │ (one writer) │                 │  current + retained (120s)│
//!  └──────────────┘                 └─────────────┬─────────────┘
//!                                                 │ borrow()
//!                                   ┌─────────────┴─────────────┐
//!                                   │ WorkView (many readers)   │
//!                                   └───────────────────────────┘
//! ```
//!
//! A reader holds an `Arc<ActiveWork>` snapshot, which is either entirely
//! before or entirely after any swap.
//!
//! ## Invariants
//!
//! 1. **Monotonicity**: within one authority, a template whose sequence is
//!    not greater than the current one is discarded.
//! 2. **Grace Window**: superseded templates keep validating shares for
//!    `grace_window` after they were replaced.
//! 3. **Authority Epoch**: `switch_authority` bumps the epoch, so job IDs
//!    from different authorities never collide.

pub mod adapters;
pub mod applier;
pub mod domain;
pub mod events;
pub mod generator;
pub mod work_view;

mod config;
mod error;
mod metrics;

pub use adapters::{RemoteSubmitter, TemplateChannelClient};
pub use applier::TemplateApplier;
pub use config::{ApplierConfig, ChannelClientConfig};
pub use domain::{ActiveWork, RetainedTemplate, ShareSubmission, ShareVerdict};
pub use error::{Result, TemplateSyncError};
pub use events::ChannelEvent;
pub use generator::TemplateGenerator;
pub use metrics::{Metrics, MetricsSnapshot};
pub use work_view::WorkView;
