//! Pure failover state machine.

mod state;

pub use state::{FailoverSignal, FailoverState, PrimaryTemplateAction, Transition};
