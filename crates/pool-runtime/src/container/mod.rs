//! # Runtime Container
//!
//! Process configuration and the per-role settings it expands into.

pub mod config;

pub use config::{
    parse_credential, CollectorSettings, ConfigError, Mode, NodeRpcSettings, PoolConfig,
    PrimarySettings, RelaySettings,
};
