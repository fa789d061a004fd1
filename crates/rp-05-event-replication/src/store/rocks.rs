//! # RocksDB Ingest Store
//!
//! ## Column Families
//!
//! - `events`: event ID → encoded envelope
//! - `dedup`: event ID → marker timestamp (u64 big-endian)
//! - `channel`: stream sequence (u64 big-endian) → retained channel message
//! - `meta`: `floor/<consumer>` → consumer ack floor (u64 big-endian)
//!
//! An event commit is one `WriteBatch` over `events` and `dedup`. The store
//! also serves as the collector channel's [`ChannelLog`], so retained
//! messages and the ingestor's position survive a restart next to the rows.

use super::IngestStore;
use crate::error::{ReplicationError, Result};
use rocksdb::{
    ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB,
};
use shared_bus::{ChannelError, ChannelLog, StoredMessage};
use shared_types::{EventId, MiningEvent};

const CF_EVENTS: &str = "events";
const CF_DEDUP: &str = "dedup";
const CF_CHANNEL: &str = "channel";
const CF_META: &str = "meta";
const COLUMN_FAMILIES: &[&str] = &[CF_EVENTS, CF_DEDUP, CF_CHANNEL, CF_META];
const FLOOR_PREFIX: &[u8] = b"floor/";

/// RocksDB store configuration
#[derive(Debug, Clone)]
pub struct RocksDbStoreConfig {
    /// Database directory
    pub path: String,
    /// fsync every commit
    pub sync_writes: bool,
}

impl RocksDbStoreConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sync_writes: true,
        }
    }

    /// Config for tests: no fsync.
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sync_writes: false,
        }
    }
}

/// RocksDB-backed [`IngestStore`].
pub struct RocksDbIngestStore {
    db: DB,
    config: RocksDbStoreConfig,
}

fn store_err(context: &str, e: impl std::fmt::Display) -> ReplicationError {
    ReplicationError::Store(format!("{context}: {e}"))
}

fn log_err(e: impl std::fmt::Display) -> ChannelError {
    ChannelError::Unavailable(format!("channel log: {e}"))
}

fn floor_key(consumer: &str) -> Vec<u8> {
    let mut key = FLOOR_PREFIX.to_vec();
    key.extend_from_slice(consumer.as_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ReplicationError::Store(format!("expected 8 bytes, found {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

impl RocksDbIngestStore {
    pub fn open(config: RocksDbStoreConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.path, cf_descriptors)
            .map_err(|e| store_err("Failed to open RocksDB", e))?;
        Ok(Self { db, config })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ReplicationError::Store(format!("missing column family {name}")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }
}

impl IngestStore for RocksDbIngestStore {
    fn has_marker(&self, event_id: &EventId) -> Result<bool> {
        let key = event_id.to_string();
        self.db
            .get_pinned_cf(self.cf(CF_DEDUP)?, key.as_bytes())
            .map(|v| v.is_some())
            .map_err(|e| store_err("RocksDB marker lookup failed", e))
    }

    fn commit(&self, event: &MiningEvent, now_ms: u64) -> Result<()> {
        let key = event.event_id.to_string();
        let row = event.encode()?;

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_EVENTS)?, key.as_bytes(), &row);
        batch.put_cf(self.cf(CF_DEDUP)?, key.as_bytes(), now_ms.to_be_bytes());

        self.db
            .write_opt(batch, &self.write_opts())
            .map_err(|e| store_err("RocksDB batch write failed", e))
    }

    fn evict_markers(&self, cutoff_ms: u64) -> Result<usize> {
        let cf = self.cf(CF_DEDUP)?;
        let mut batch = WriteBatch::default();
        let mut evicted = 0;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| store_err("RocksDB scan failed", e))?;
            if decode_u64(&value)? < cutoff_ms {
                batch.delete_cf(cf, key);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.db
                .write_opt(batch, &self.write_opts())
                .map_err(|e| store_err("RocksDB marker eviction failed", e))?;
        }
        Ok(evicted)
    }

    fn get(&self, event_id: &EventId) -> Result<Option<MiningEvent>> {
        let key = event_id.to_string();
        match self
            .db
            .get_pinned_cf(self.cf(CF_EVENTS)?, key.as_bytes())
            .map_err(|e| store_err("RocksDB get failed", e))?
        {
            Some(bytes) => Ok(Some(MiningEvent::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn event_count(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.db.iterator_cf(self.cf(CF_EVENTS)?, IteratorMode::Start) {
            item.map_err(|e| store_err("RocksDB scan failed", e))?;
            count += 1;
        }
        Ok(count)
    }
}

impl ChannelLog for RocksDbIngestStore {
    fn append(&self, message: &StoredMessage) -> std::result::Result<(), ChannelError> {
        let value = bincode::serialize(message).map_err(log_err)?;
        let cf = self.cf(CF_CHANNEL).map_err(log_err)?;
        self.db
            .put_cf_opt(cf, message.sequence.to_be_bytes(), value, &self.write_opts())
            .map_err(log_err)
    }

    fn load(&self) -> std::result::Result<Vec<StoredMessage>, ChannelError> {
        let cf = self.cf(CF_CHANNEL).map_err(log_err)?;
        let mut messages = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(log_err)?;
            messages.push(bincode::deserialize(&value).map_err(log_err)?);
        }
        Ok(messages)
    }

    fn remove_through(&self, sequence: u64) -> std::result::Result<(), ChannelError> {
        let cf = self.cf(CF_CHANNEL).map_err(log_err)?;
        let mut batch = WriteBatch::default();
        batch.delete_range_cf(cf, 0u64.to_be_bytes(), sequence.saturating_add(1).to_be_bytes());
        self.db.write_opt(batch, &self.write_opts()).map_err(log_err)
    }

    fn save_ack_floor(&self, consumer: &str, sequence: u64) -> std::result::Result<(), ChannelError> {
        let cf = self.cf(CF_META).map_err(log_err)?;
        self.db
            .put_cf_opt(cf, floor_key(consumer), sequence.to_be_bytes(), &self.write_opts())
            .map_err(log_err)
    }

    fn ack_floors(&self) -> std::result::Result<Vec<(String, u64)>, ChannelError> {
        let cf = self.cf(CF_META).map_err(log_err)?;
        let mut floors = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(FLOOR_PREFIX, Direction::Forward))
        {
            let (key, value) = item.map_err(log_err)?;
            let Some(name) = key.strip_prefix(FLOOR_PREFIX) else {
                break;
            };
            let name = String::from_utf8(name.to_vec()).map_err(log_err)?;
            floors.push((name, decode_u64(&value).map_err(log_err)?));
        }
        Ok(floors)
    }
}
