//! Configuration for the dual submission race

use std::time::Duration;

/// Dual submission race configuration
#[derive(Clone, Debug)]
pub struct RaceConfig {
    /// Deadline for the local node path
    pub local_timeout: Duration,

    /// Deadline for the primary path
    pub remote_timeout: Duration,

    /// Confirmed block hashes remembered for idempotence
    pub confirmed_capacity: usize,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            local_timeout: Duration::from_secs(5),
            remote_timeout: Duration::from_secs(5),
            confirmed_capacity: 4096,
        }
    }
}
