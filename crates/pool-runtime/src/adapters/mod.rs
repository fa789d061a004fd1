//! Adapters to systems outside the pool.

pub mod bitcoind;

pub use bitcoind::BitcoindNode;
