//! # Role Wiring
//!
//! Each role builds its components, spawns their tasks onto the runtime's
//! `JoinSet` and hands back the handles callers need.

pub mod collector;
pub mod primary;
pub mod relay;

pub use collector::{open_store, CollectorRole, CollectorStorage};
pub use primary::PrimaryRole;
pub use relay::RelayRole;

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Run `report` every `period` until shutdown.
pub(crate) fn spawn_reporter<F>(
    tasks: &mut JoinSet<()>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    report: F,
) where
    F: Fn() + Send + 'static,
{
    tasks.spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing to report yet.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => report(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
