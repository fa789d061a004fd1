//! # Mining Event Envelope
//!
//! The immutable record replicated from every region to the central
//! collector, and its codec.
//!
//! ## Properties
//!
//! - **Idempotency Key**: `EventId` (`relay / boot / counter`) is globally
//!   unique. `boot` is the publisher start time in milliseconds, so a
//!   restarted relay never reuses an ID that may already be persisted.
//! - **Versioning**: Every encoded envelope carries `version`; decoders reject
//!   versions they do not understand.
//! - **Self-Describing**: `event_type` is encoded next to the payload and
//!   cross-checked on decode.

use crate::entities::{Region, RelayId, SubmissionPath, TemplateId};
use crate::errors::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Globally unique event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId {
    pub relay_id: RelayId,
    pub boot_id: u64,
    pub counter: u64,
}

impl EventId {
    pub fn new(relay_id: RelayId, boot_id: u64, counter: u64) -> Self {
        Self {
            relay_id,
            boot_id,
            counter,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.relay_id, self.boot_id, self.counter)
    }
}

impl FromStr for EventId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Relay IDs may themselves contain '/', so split from the right.
        let mut parts = s.rsplitn(3, '/');
        let counter = parts.next();
        let boot = parts.next();
        let relay = parts.next();

        match (relay, boot, counter) {
            (Some(relay), Some(boot), Some(counter)) if !relay.is_empty() => {
                let boot_id = boot
                    .parse()
                    .map_err(|_| CodecError::InvalidEventId(s.to_string()))?;
                let counter = counter
                    .parse()
                    .map_err(|_| CodecError::InvalidEventId(s.to_string()))?;
                Ok(Self::new(RelayId::new(relay), boot_id, counter))
            }
            _ => Err(CodecError::InvalidEventId(s.to_string())),
        }
    }
}

impl TryFrom<String> for EventId {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.to_string()
    }
}

/// The eight kinds of mining occurrence that are replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiningEventType {
    ShareSubmitted,
    BlockFound,
    MinerConnected,
    MinerDisconnected,
    DifficultyUpdated,
    HashrateUpdated,
    NetworkBlock,
    BestDifficulty,
}

impl MiningEventType {
    /// Subject token used on the replication channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShareSubmitted => "share_submitted",
            Self::BlockFound => "block_found",
            Self::MinerConnected => "miner_connected",
            Self::MinerDisconnected => "miner_disconnected",
            Self::DifficultyUpdated => "difficulty_updated",
            Self::HashrateUpdated => "hashrate_updated",
            Self::NetworkBlock => "network_block",
            Self::BestDifficulty => "best_difficulty",
        }
    }
}

impl fmt::Display for MiningEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload of a mining event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MiningEventPayload {
    ShareSubmitted {
        worker: String,
        template: TemplateId,
        difficulty: f64,
        accepted: bool,
    },
    BlockFound {
        worker: String,
        /// Display-order hex block hash.
        block_hash: String,
        height: u64,
        template: TemplateId,
        winner: SubmissionPath,
    },
    MinerConnected {
        worker: String,
        remote_addr: Option<String>,
    },
    MinerDisconnected {
        worker: String,
        reason: String,
    },
    DifficultyUpdated {
        worker: String,
        difficulty: f64,
    },
    HashrateUpdated {
        worker: String,
        hashrate_hs: f64,
    },
    NetworkBlock {
        height: u64,
        block_hash: String,
    },
    BestDifficulty {
        worker: String,
        difficulty: f64,
    },
}

impl MiningEventPayload {
    pub fn event_type(&self) -> MiningEventType {
        match self {
            Self::ShareSubmitted { .. } => MiningEventType::ShareSubmitted,
            Self::BlockFound { .. } => MiningEventType::BlockFound,
            Self::MinerConnected { .. } => MiningEventType::MinerConnected,
            Self::MinerDisconnected { .. } => MiningEventType::MinerDisconnected,
            Self::DifficultyUpdated { .. } => MiningEventType::DifficultyUpdated,
            Self::HashrateUpdated { .. } => MiningEventType::HashrateUpdated,
            Self::NetworkBlock { .. } => MiningEventType::NetworkBlock,
            Self::BestDifficulty { .. } => MiningEventType::BestDifficulty,
        }
    }
}

/// An immutable mining event.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningEvent {
    pub event_id: EventId,
    pub region: Region,
    pub emitted_at_ms: u64,
    pub payload: MiningEventPayload,
}

impl MiningEvent {
    pub fn event_type(&self) -> MiningEventType {
        self.payload.event_type()
    }

    /// Replication subject: `events.<region>.<event_type>`.
    pub fn subject(&self) -> String {
        format!("events.{}.{}", self.region, self.event_type())
    }

    /// Encode into the versioned wire envelope.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let envelope = EventEnvelope {
            version: EventEnvelope::CURRENT_VERSION,
            event_id: self.event_id.clone(),
            region: self.region.clone(),
            event_type: self.event_type(),
            emitted_at_ms: self.emitted_at_ms,
            payload: self.payload.clone(),
        };
        serde_json::to_vec(&envelope).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Decode and validate a wire envelope.
    ///
    /// # Errors
    ///
    /// - `CodecError::Deserialization` for malformed bytes
    /// - `CodecError::UnsupportedVersion` for unknown envelope versions
    /// - `CodecError::TypeMismatch` when `event_type` disagrees with the payload
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let envelope: EventEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::Deserialization(e.to_string()))?;

        if envelope.version != EventEnvelope::CURRENT_VERSION {
            return Err(CodecError::UnsupportedVersion {
                received: envelope.version,
                supported: EventEnvelope::CURRENT_VERSION,
            });
        }

        let actual = envelope.payload.event_type();
        if envelope.event_type != actual {
            return Err(CodecError::TypeMismatch {
                declared: envelope.event_type,
                payload: actual,
            });
        }

        Ok(Self {
            event_id: envelope.event_id,
            region: envelope.region,
            emitted_at_ms: envelope.emitted_at_ms,
            payload: envelope.payload,
        })
    }
}

/// Versioned wire form of a `MiningEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub version: u16,
    pub event_id: EventId,
    pub region: Region,
    pub event_type: MiningEventType,
    pub emitted_at_ms: u64,
    pub payload: MiningEventPayload,
}

impl EventEnvelope {
    pub const CURRENT_VERSION: u16 = 1;
}

/// Sink for locally observed occurrences.
///
/// Implementations must never block: share processing calls this on its hot
/// path. Returns `None` when the event could not be accepted (and that loss
/// has been logged by the implementation).
pub trait EventEmitter: Send + Sync {
    fn emit(&self, payload: MiningEventPayload) -> Option<EventId>;
}
