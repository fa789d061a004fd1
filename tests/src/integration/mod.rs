//! Cross-crate integration scenarios.

pub mod fixtures;

mod block_race;
mod event_pipeline;
mod failover_shares;
mod runtime_roles;
mod template_channel;
