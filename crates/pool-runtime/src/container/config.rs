//! # Pool Configuration
//!
//! One TOML file per process. The `[mode.*]` table selects the role:
//!
//! ```toml
//! metrics_interval_ms = 30000
//!
//! [node]
//! url = "http://127.0.0.1:8332"
//! user = "pool"
//! password = "secret"
//!
//! [mode.relay]
//! relay_id = "relay-eu-1"
//! region = "eu-west"
//! primary_addr = "primary.pool.internal:3334"
//! collector_addr = "collector.pool.internal:4222"
//! credential = "<hex>"
//! ```
//!
//! ## Environment Overrides
//!
//! | Variable | Applies to |
//! |----------|------------|
//! | `RP_CREDENTIAL` | primary, relay, collector |
//! | `RP_REGION` | relay |
//! | `RP_NODE_URL` | primary, relay |
//!
//! ## Security Requirements
//!
//! - The credential is hex and at least 16 bytes. There is no default.
//!   The collector's replication bridge checks publishers against it too.
//! - The region is always configured, never inferred.

use rp_01_relay_manager::ManagerConfig;
use rp_02_template_sync::{ApplierConfig, ChannelClientConfig};
use rp_03_failover::FailoverConfig;
use rp_04_block_submission::RaceConfig;
use rp_05_event_replication::{IngestorConfig, PublisherConfig};
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use shared_bus::{BridgeIdentity, ChannelConfig};
use shared_types::{Region, RelayCredential, RelayId};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Shortest accepted shared credential.
pub const MIN_CREDENTIAL_BYTES: usize = 16;

/// Configuration errors. All of them abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Setting `{0}` must be greater than zero")]
    Zero(&'static str),

    #[error("Invalid setting `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Complete process configuration.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Role of this process.
    pub mode: Mode,

    /// Local (or archival) node RPC. Unused by the collector.
    #[serde(default)]
    pub node: NodeRpcSettings,

    /// Period of the metrics log line.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "metrics_interval_ms", default = "default_metrics_interval")]
    pub metrics_interval: Duration,
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(30)
}

/// Process role.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Primary(PrimarySettings),
    Relay(RelaySettings),
    Collector(CollectorSettings),
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Primary(_) => "primary",
            Mode::Relay(_) => "relay",
            Mode::Collector(_) => "collector",
        }
    }
}

/// Bitcoin Core style JSON-RPC endpoint.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeRpcSettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for NodeRpcSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".to_string(),
            user: None,
            password: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Primary: archival-node template source and relay connection manager.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrimarySettings {
    /// Template channel listen address.
    pub listen_addr: String,

    /// Hex-encoded shared relay credential.
    pub credential: String,

    /// How often the archival node is polled for new work.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "template_poll_interval_ms")]
    pub template_poll_interval: Duration,

    /// Heartbeat interval expected from each relay.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,

    pub degraded_after_missed: u32,
    pub unreachable_after_missed: u32,
}

impl Default for PrimarySettings {
    fn default() -> Self {
        let manager = ManagerConfig::default();
        Self {
            listen_addr: "0.0.0.0:3334".to_string(),
            credential: String::new(),
            template_poll_interval: Duration::from_secs(1),
            heartbeat_interval: manager.heartbeat_interval,
            degraded_after_missed: manager.degraded_after_missed,
            unreachable_after_missed: manager.unreachable_after_missed,
        }
    }
}

impl PrimarySettings {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            heartbeat_interval: self.heartbeat_interval,
            degraded_after_missed: self.degraded_after_missed,
            unreachable_after_missed: self.unreachable_after_missed,
            ..ManagerConfig::default()
        }
    }
}

/// Relay: regional template follower with failover and dual submission.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaySettings {
    pub relay_id: String,
    pub region: String,

    /// Primary template server (`host:port`).
    pub primary_addr: String,

    /// Collector replication bridge (`host:port`).
    pub collector_addr: String,

    /// Hex-encoded shared relay credential.
    pub credential: String,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,

    /// Primary silence before going independent.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "failover_threshold_ms")]
    pub failover_threshold: Duration,

    /// Local node poll period while independent.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "local_poll_interval_ms")]
    pub local_poll_interval: Duration,

    /// Superseded templates keep validating shares this long.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "grace_window_ms")]
    pub grace_window: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "local_submit_timeout_ms")]
    pub local_submit_timeout: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "remote_submit_timeout_ms")]
    pub remote_submit_timeout: Duration,

    /// Events buffered while the collector is unreachable.
    pub event_buffer_capacity: usize,

    /// Deadline for one publish round trip to the collector.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "publish_timeout_ms")]
    pub publish_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        let failover = FailoverConfig::default();
        let race = RaceConfig::default();
        Self {
            relay_id: String::new(),
            region: String::new(),
            primary_addr: String::new(),
            collector_addr: String::new(),
            credential: String::new(),
            heartbeat_interval: Duration::from_secs(2),
            failover_threshold: failover.threshold,
            local_poll_interval: failover.local_poll_interval,
            grace_window: ApplierConfig::default().grace_window,
            local_submit_timeout: race.local_timeout,
            remote_submit_timeout: race.remote_timeout,
            event_buffer_capacity: 100_000,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl RelaySettings {
    pub fn relay_id(&self) -> RelayId {
        RelayId::new(self.relay_id.clone())
    }

    pub fn region(&self) -> Region {
        Region::new(self.region.clone())
    }

    pub fn applier_config(&self) -> ApplierConfig {
        ApplierConfig {
            grace_window: self.grace_window,
            ..ApplierConfig::default()
        }
    }

    pub fn channel_client_config(&self) -> ChannelClientConfig {
        let mut config =
            ChannelClientConfig::new(self.primary_addr.clone(), self.relay_id(), self.region());
        config.heartbeat_interval = self.heartbeat_interval;
        config
    }

    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            threshold: self.failover_threshold,
            local_poll_interval: self.local_poll_interval,
            ..FailoverConfig::default()
        }
    }

    pub fn race_config(&self) -> RaceConfig {
        RaceConfig {
            local_timeout: self.local_submit_timeout,
            remote_timeout: self.remote_submit_timeout,
            ..RaceConfig::default()
        }
    }

    /// What the relay proves to the collector's replication bridge.
    pub fn bridge_identity(&self) -> Result<BridgeIdentity, ConfigError> {
        Ok(BridgeIdentity {
            relay_id: self.relay_id(),
            region: self.region(),
            credential: parse_credential(&self.credential)?,
        })
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        let mut config = PublisherConfig::new(self.relay_id(), self.region());
        config.buffer_capacity = self.event_buffer_capacity;
        config
    }
}

/// Collector: central replication channel and event ingestor.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorSettings {
    /// Replication bridge listen address.
    pub listen_addr: String,

    /// Hex-encoded shared relay credential; bridge publishers must prove it.
    pub credential: String,

    /// RocksDB directory. Without it events are kept in memory.
    pub data_dir: Option<PathBuf>,

    /// Ingestor dedup marker lifetime.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "dedup_window_secs")]
    pub dedup_window: Duration,

    /// Channel message retention.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "retention_secs")]
    pub retention: Duration,

    /// Redelivery timeout for unacknowledged deliveries.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "ack_wait_ms")]
    pub ack_wait: Duration,

    pub batch_size: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        let ingestor = IngestorConfig::default();
        let channel = ChannelConfig::default();
        Self {
            listen_addr: "0.0.0.0:4222".to_string(),
            credential: String::new(),
            data_dir: None,
            dedup_window: ingestor.dedup_window,
            retention: channel.max_age,
            ack_wait: channel.ack_wait,
            batch_size: ingestor.batch_size,
        }
    }
}

impl CollectorSettings {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            max_age: self.retention,
            ack_wait: self.ack_wait,
            ..ChannelConfig::default()
        }
    }

    pub fn ingestor_config(&self) -> IngestorConfig {
        IngestorConfig {
            dedup_window: self.dedup_window,
            batch_size: self.batch_size,
            ..IngestorConfig::default()
        }
    }
}

impl PoolConfig {
    /// Read, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `RP_*` overrides looked up through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("RP_NODE_URL") {
            self.node.url = url;
        }
        let credential = var("RP_CREDENTIAL");
        match &mut self.mode {
            Mode::Primary(primary) => {
                if let Some(credential) = credential {
                    primary.credential = credential;
                }
            }
            Mode::Relay(relay) => {
                if let Some(credential) = credential {
                    relay.credential = credential;
                }
                if let Some(region) = var("RP_REGION") {
                    relay.region = region;
                }
            }
            Mode::Collector(collector) => {
                if let Some(credential) = credential {
                    collector.credential = credential;
                }
            }
        }
    }

    /// Reject configurations the process cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("metrics_interval_ms", self.metrics_interval)?;
        match &self.mode {
            Mode::Primary(primary) => {
                self.validate_node()?;
                required("listen_addr", &primary.listen_addr)?;
                parse_credential(&primary.credential)?;
                non_zero("template_poll_interval_ms", primary.template_poll_interval)?;
                non_zero("heartbeat_interval_ms", primary.heartbeat_interval)?;
                if primary.degraded_after_missed == 0 {
                    return Err(ConfigError::Zero("degraded_after_missed"));
                }
                if primary.unreachable_after_missed <= primary.degraded_after_missed {
                    return Err(ConfigError::Invalid {
                        name: "unreachable_after_missed",
                        reason: "must exceed degraded_after_missed".to_string(),
                    });
                }
            }
            Mode::Relay(relay) => {
                self.validate_node()?;
                required("relay_id", &relay.relay_id)?;
                required("region", &relay.region)?;
                required("primary_addr", &relay.primary_addr)?;
                required("collector_addr", &relay.collector_addr)?;
                parse_credential(&relay.credential)?;
                non_zero("heartbeat_interval_ms", relay.heartbeat_interval)?;
                non_zero("failover_threshold_ms", relay.failover_threshold)?;
                non_zero("local_poll_interval_ms", relay.local_poll_interval)?;
                non_zero("grace_window_ms", relay.grace_window)?;
                non_zero("local_submit_timeout_ms", relay.local_submit_timeout)?;
                non_zero("remote_submit_timeout_ms", relay.remote_submit_timeout)?;
                non_zero("publish_timeout_ms", relay.publish_timeout)?;
                if relay.event_buffer_capacity == 0 {
                    return Err(ConfigError::Zero("event_buffer_capacity"));
                }
                if relay.failover_threshold <= relay.heartbeat_interval {
                    return Err(ConfigError::Invalid {
                        name: "failover_threshold_ms",
                        reason: "must exceed heartbeat_interval_ms".to_string(),
                    });
                }
            }
            Mode::Collector(collector) => {
                required("listen_addr", &collector.listen_addr)?;
                parse_credential(&collector.credential)?;
                non_zero("dedup_window_secs", collector.dedup_window)?;
                non_zero("retention_secs", collector.retention)?;
                non_zero("ack_wait_ms", collector.ack_wait)?;
                if collector.batch_size == 0 {
                    return Err(ConfigError::Zero("batch_size"));
                }
            }
        }
        Ok(())
    }

    fn validate_node(&self) -> Result<(), ConfigError> {
        required("node.url", &self.node.url)?;
        non_zero("node.timeout_ms", self.node.timeout)
    }
}

fn required(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(())
}

fn non_zero(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Zero(name));
    }
    Ok(())
}

/// Decode a hex credential.
pub fn parse_credential(hex_credential: &str) -> Result<RelayCredential, ConfigError> {
    required("credential", hex_credential)?;
    let bytes = hex::decode(hex_credential.trim()).map_err(|e| ConfigError::Invalid {
        name: "credential",
        reason: e.to_string(),
    })?;
    if bytes.len() < MIN_CREDENTIAL_BYTES {
        return Err(ConfigError::Invalid {
            name: "credential",
            reason: format!("{} bytes, need at least {MIN_CREDENTIAL_BYTES}", bytes.len()),
        });
    }
    Ok(RelayCredential::new(bytes))
}
