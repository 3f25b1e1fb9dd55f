//! # sluice-store — Persistent stream ledger.
//!
//! [`RocksLedger`] stores one stream record and its positions in RocksDB so
//! an instance can be resumed after any number of operations.

pub mod rocks;

pub use rocks::RocksLedger;
