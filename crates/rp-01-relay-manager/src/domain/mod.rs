//! Domain layer: registration state and delivery bookkeeping.
//!
//! Pure logic driven by explicit `Instant`s; no I/O, no tasks.

mod delivery;
mod registration;

pub use delivery::{AckOutcome, DeliveryTracker};
pub use registration::{HealthPolicy, RelayRegistration, RelayStatus};
