//! Configuration for the failover controller

use std::time::Duration;

/// Failover controller configuration
#[derive(Clone, Debug)]
pub struct FailoverConfig {
    /// Continuous time without primary activity before going independent
    pub threshold: Duration,

    /// How often the local node is polled for new work while independent
    pub local_poll_interval: Duration,

    /// Forced local template refresh while independent, even if the node's
    /// work is unchanged
    pub local_refresh_interval: Duration,

    /// How often the threshold is evaluated
    pub check_interval: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(10),
            local_poll_interval: Duration::from_secs(1),
            local_refresh_interval: Duration::from_secs(30),
            check_interval: Duration::from_millis(250),
        }
    }
}
