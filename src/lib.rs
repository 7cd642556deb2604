//! emberdb is an embedded, durable key-value store built on the
//! log-structured merge pattern: a write-ahead log for durability, an
//! in-memory memtable for recent writes, an offset-indexed SSTable
//! for long-lived data, and an offline compaction pass that reclaims
//! tombstoned and overwritten records.

pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod memtable;
pub mod record;
pub mod sstable;
pub mod wal;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
