//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Work**: `NodeTemplate`, `BlockTemplate`, `TemplateId`, `TemplateSource`
//! - **Solutions**: `BlockHeader`, `BlockCandidate`, `SubmissionPath`
//! - **Topology**: `RelayId`, `Region`, `HealthState`, `FailoverMode`

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// =============================================================================
// CLUSTER A: IDENTITY
// =============================================================================

/// A 32-byte hash in internal (little-endian) byte order.
pub type Hash = [u8; 32];

/// Identifier of a relay instance, unique across the deployment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelayId(pub String);

impl RelayId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static region tag supplied at startup (e.g. `eu-west`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region(pub String);

impl Region {
    pub fn new(region: impl Into<String>) -> Self {
        Self(region.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// CLUSTER B: WORK
// =============================================================================

/// Who produced a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateSource {
    /// Generated by the primary and received over the template channel.
    Primary,
    /// Generated by the relay's own node while independent.
    Local,
}

/// Raw work descriptor as returned by a full/pruned node.
///
/// Carries no sequence number; the `TemplateGenerator` stamps one when it
/// turns this into a `BlockTemplate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTemplate {
    /// Height of the block being built.
    pub height: u64,
    /// Hash of the current chain tip.
    pub prev_block_hash: Hash,
    /// Total coinbase value in satoshis (subsidy + fees).
    pub coinbase_value: u64,
    /// Commitment to the selected transaction set.
    pub tx_commitment: Hash,
    /// Compact network target.
    pub bits: u32,
    /// Node's current time (unix seconds).
    pub curtime: u32,
}

impl NodeTemplate {
    /// Two node templates describe the same work when tip, transaction set
    /// and coinbase agree. `curtime` is ignored.
    pub fn same_work(&self, other: &NodeTemplate) -> bool {
        self.prev_block_hash == other.prev_block_hash
            && self.tx_commitment == other.tx_commitment
            && self.coinbase_value == other.coinbase_value
            && self.bits == other.bits
    }
}

/// Sequenced block template distributed to miners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTemplate {
    /// Generation sequence number within the producing authority.
    pub sequence: u64,
    /// Producer of this template.
    pub source: TemplateSource,
    /// Height of the block being built.
    pub height: u64,
    /// Hash of the previous block.
    pub prev_block_hash: Hash,
    /// Coinbase value in satoshis.
    pub coinbase_value: u64,
    /// Commitment to the transaction set.
    pub tx_commitment: Hash,
    /// Compact network target.
    pub bits: u32,
    /// Creation time (unix milliseconds).
    pub created_at_ms: u64,
}

impl BlockTemplate {
    /// Build a sequenced template from a node descriptor.
    pub fn from_node(
        node: NodeTemplate,
        sequence: u64,
        source: TemplateSource,
        created_at_ms: u64,
    ) -> Self {
        Self {
            sequence,
            source,
            height: node.height,
            prev_block_hash: node.prev_block_hash,
            coinbase_value: node.coinbase_value,
            tx_commitment: node.tx_commitment,
            bits: node.bits,
            created_at_ms,
        }
    }

    /// Expanded 256-bit network target (big-endian), or `None` for a
    /// malformed compact encoding.
    pub fn target(&self) -> Option<[u8; 32]> {
        expand_compact_target(self.bits)
    }

    /// Basic structural sanity check applied to templates received from the
    /// wire. A template failing this is a protocol error.
    pub fn is_well_formed(&self) -> bool {
        self.sequence > 0 && self.bits != 0 && self.target().is_some()
    }
}

/// Expand a compact `nBits` value into a big-endian 256-bit target.
pub fn expand_compact_target(bits: u32) -> Option<[u8; 32]> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 || exponent > 32 {
        return None;
    }

    let mut target = [0u8; 32];
    let bytes = mantissa.to_be_bytes();
    if exponent <= 3 {
        let shifted = mantissa >> (8 * (3 - exponent));
        target[29..].copy_from_slice(&shifted.to_be_bytes()[1..]);
    } else {
        let start = 32 - exponent;
        for (i, b) in bytes[1..].iter().enumerate() {
            if let Some(slot) = target.get_mut(start + i) {
                *slot = *b;
            }
        }
    }
    Some(target)
}

/// Identity of a unit of work on a relay.
///
/// `epoch` is the relay's authority epoch (bumped on every failover
/// transition); `sequence` is the template's generation sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TemplateId {
    pub epoch: u32,
    pub sequence: u64,
}

impl TemplateId {
    pub fn new(epoch: u32, sequence: u64) -> Self {
        Self { epoch, sequence }
    }

    /// Job identifier handed to miners.
    pub fn job_id(&self) -> String {
        format!("{:x}-{:x}", self.epoch, self.sequence)
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.sequence)
    }
}

// =============================================================================
// CLUSTER C: SOLUTIONS
// =============================================================================

/// Bitcoin block header (80 bytes serialized).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialized header length.
    pub const SIZE: usize = 80;

    /// Consensus serialization.
    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block_hash);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Double SHA-256 of the serialized header, internal byte order.
    pub fn block_hash(&self) -> Hash {
        let first = Sha256::digest(self.serialize());
        let second = Sha256::digest(first);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&second);
        hash
    }
}

/// Display a hash the way block explorers do (reversed hex).
pub fn display_hash(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// A share that meets the network target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCandidate {
    /// Solved header.
    pub header: BlockHeader,
    /// Serialized full block as assembled by the share layer.
    /// Empty when the collaborator only deals in headers.
    pub block_data: Vec<u8>,
    /// Relay that found the solution.
    pub relay_id: RelayId,
    /// Miner worker that submitted the solving share.
    pub worker: String,
    /// Work the solution was mined against.
    pub template: TemplateId,
    /// Height of the block.
    pub height: u64,
    /// Discovery time (unix milliseconds).
    pub discovered_at_ms: u64,
}

impl BlockCandidate {
    pub fn block_hash(&self) -> Hash {
        self.header.block_hash()
    }
}

/// The two block submission routes raced for every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionPath {
    /// The relay's own full/pruned node.
    Local,
    /// Forwarded to the primary, which submits via its archival node.
    Remote,
}

impl fmt::Display for SubmissionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionPath::Local => f.write_str("local"),
            SubmissionPath::Remote => f.write_str("remote"),
        }
    }
}

// =============================================================================
// CLUSTER D: TOPOLOGY STATE
// =============================================================================

/// Primary-side view of a relay's liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unreachable,
}

impl HealthState {
    /// Whether templates are still pushed to a relay in this state.
    pub fn is_broadcast_target(&self) -> bool {
        !matches!(self, HealthState::Unreachable)
    }
}

/// Relay-side template authority mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FailoverMode {
    /// Templates come from the primary.
    #[default]
    Following,
    /// Templates come from the relay's own node.
    Independent,
}

impl fmt::Display for FailoverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverMode::Following => f.write_str("following"),
            FailoverMode::Independent => f.write_str("independent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis_header() -> BlockHeader {
        let mut merkle_root =
            hex::decode("3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a")
                .unwrap();
        merkle_root.reverse();
        BlockHeader {
            version: 1,
            prev_block_hash: [0u8; 32],
            merkle_root: merkle_root.try_into().unwrap(),
            time: 1_231_006_505,
            bits: 0x1d00ffff,
            nonce: 2_083_236_893,
        }
    }

    #[test]
    fn test_genesis_block_hash() {
        let hash = genesis_header().block_hash();
        assert_eq!(
            display_hash(&hash),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn test_expand_compact_target_genesis() {
        let target = expand_compact_target(0x1d00ffff).unwrap();
        assert_eq!(&target[..4], &[0, 0, 0, 0]);
        assert_eq!(&target[4..6], &[0xff, 0xff]);
        assert!(target[6..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_expand_compact_target_rejects_negative() {
        assert!(expand_compact_target(0x1d80ffff).is_none());
        assert!(expand_compact_target(0x2200ffff).is_none());
    }

    #[test]
    fn test_template_id_ordering() {
        assert!(TemplateId::new(0, 9) < TemplateId::new(1, 1));
        assert!(TemplateId::new(1, 1) < TemplateId::new(1, 2));
        assert_eq!(TemplateId::new(2, 255).job_id(), "2-ff");
    }

    #[test]
    fn test_same_work_ignores_curtime() {
        let a = NodeTemplate {
            height: 800_000,
            prev_block_hash: [1; 32],
            coinbase_value: 625_000_000,
            tx_commitment: [2; 32],
            bits: 0x17053894,
            curtime: 100,
        };
        let mut b = a.clone();
        b.curtime = 200;
        assert!(a.same_work(&b));
        b.prev_block_hash = [3; 32];
        assert!(!a.same_work(&b));
    }

    #[test]
    fn test_health_broadcast_targets() {
        assert!(HealthState::Healthy.is_broadcast_target());
        assert!(HealthState::Degraded.is_broadcast_target());
        assert!(!HealthState::Unreachable.is_broadcast_target());
    }
}
