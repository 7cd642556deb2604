use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::memtable::{FlushSink, Memtable};
use crate::sstable::SSTable;
use crate::wal::Wal;

/// Thin façade over the storage components.
///
/// Writes go WAL-first: an append plus a flush barrier makes the
/// mutation durable before the memtable and SSTable are touched.
/// Reads consult the memtable and fall back to the SSTable, so a
/// write that reached the memtable is immediately visible. There is
/// no cross-component atomicity beyond that ordering and no rollback:
/// a failed SSTable write leaves the memtable ahead until a restart
/// replays the WAL.
pub struct Engine {
    wal: Arc<Wal>,
    memtable: Arc<Memtable>,
    sstable: Arc<SSTable>,
}

/// Memtable flush sink that writes the snapshot through to the
/// SSTable. Entries that fail to persist are logged and dropped; they
/// remain recoverable from the WAL.
struct WriteThrough {
    sstable: Arc<SSTable>,
}

impl FlushSink for WriteThrough {
    fn flush(&self, entries: BTreeMap<String, String>) {
        for (key, value) in entries {
            if let Err(e) = self.sstable.write(&key, &value) {
                tracing::error!(key = %key, error = %e, "Failed to flush memtable entry to SSTable");
            }
        }
    }
}

impl Engine {
    /// Wires up WAL, SSTable and memtable under `config`, then
    /// replays the WAL into the memtable. Must be called within a
    /// Tokio runtime (the WAL owns a background task).
    pub fn open(config: &Config) -> Result<Self> {
        if let Some(parent) = config.sstable_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let wal = Arc::new(Wal::open(&config.wal_dir)?);
        let sstable = Arc::new(SSTable::open(&config.sstable_path)?);
        let memtable = Arc::new(Memtable::new(
            config.memtable_max_entries,
            Some(Arc::new(WriteThrough {
                sstable: sstable.clone(),
            })),
        ));

        let restored = wal.replay()?;
        let count = restored.len();
        for (key, value) in restored {
            memtable.set(&key, &value);
        }
        tracing::info!(entries = count, "WAL replay restored entries to memtable");

        Ok(Self {
            wal,
            memtable,
            sstable,
        })
    }

    /// Stores a key-value pair: WAL append + flush, memtable set,
    /// SSTable write.
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.wal.append(key, value)?;
        self.wal.flush().await?;

        self.memtable.set(key, value);
        self.sstable.write(key, value)
    }

    /// Stores a batch of pairs: every entry is appended to the WAL
    /// and made durable by a single flush before any table is
    /// updated.
    pub async fn batch_put(&self, pairs: &[(String, String)]) -> Result<()> {
        for (key, value) in pairs {
            self.wal.append(key, value)?;
        }
        self.wal.flush().await?;

        for (key, value) in pairs {
            self.memtable.set(key, value);
            self.sstable.write(key, value)?;
        }
        Ok(())
    }

    /// Reads a key: memtable hit, otherwise SSTable lookup.
    pub fn get(&self, key: &str) -> Result<String> {
        match self.memtable.get(key) {
            Some(value) => Ok(value),
            None => self.sstable.read(key),
        }
    }

    /// Removes a key from the memtable and tombstones it in the
    /// SSTable. Fails with `KeyNotFound` if the SSTable has never
    /// indexed the key.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.memtable.delete(key);
        self.sstable.delete(key)
    }

    /// Returns all live pairs with keys in `[start, end]` inclusive,
    /// merging the SSTable range under the memtable range (memtable
    /// entries win, matching the point-read path).
    pub fn range(&self, start: &str, end: &str) -> Result<BTreeMap<String, String>> {
        let mut results = self.sstable.read_range(start, end)?;
        results.extend(self.memtable.get_range(start, end));
        Ok(results)
    }

    /// Shuts the engine down: stops and joins the WAL flusher, then
    /// flushes the SSTable and persists its index.
    pub async fn close(&self) -> Result<()> {
        self.wal.close().await?;
        self.sstable.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config::default()
            .wal_dir(dir.path().join("wal"))
            .sstable_path(dir.path().join("sstable.db"))
            .memtable_max_entries(1000)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = Engine::open(&test_config(&dir)).expect("Failed to open engine");

        engine.put("txn123", "approved").await.expect("Put failed");
        assert_eq!(engine.get("txn123").expect("Get failed"), "approved");

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = Engine::open(&test_config(&dir)).expect("Failed to open engine");

        engine.put("txn", "pending").await.expect("Put failed");
        engine.put("txn", "approved").await.expect("Put failed");
        assert_eq!(engine.get("txn").expect("Get failed"), "approved");

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_empty_key_or_value_rejected() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = Engine::open(&test_config(&dir)).expect("Failed to open engine");

        assert!(matches!(
            engine.put("", "value").await,
            Err(Error::InvalidEntry(_))
        ));
        assert!(matches!(
            engine.put("key", "").await,
            Err(Error::InvalidEntry(_))
        ));

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = Engine::open(&test_config(&dir)).expect("Failed to open engine");

        assert!(matches!(engine.get("absent"), Err(Error::KeyNotFound(_))));

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = Engine::open(&test_config(&dir)).expect("Failed to open engine");

        engine.put("txn789", "pending").await.expect("Put failed");
        engine.delete("txn789").expect("Delete failed");

        assert!(matches!(engine.get("txn789"), Err(Error::KeyNotFound(_))));
        assert!(matches!(
            engine.delete("txn789"),
            Err(Error::KeyNotFound(_))
        ));

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_batch_put() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = Engine::open(&test_config(&dir)).expect("Failed to open engine");

        let pairs: Vec<(String, String)> = (0..10)
            .map(|i| (format!("key{i}"), format!("value{i}")))
            .collect();
        engine.batch_put(&pairs).await.expect("Batch put failed");

        for (key, value) in &pairs {
            assert_eq!(&engine.get(key).expect("Get failed"), value);
        }

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_range_merges_memtable_and_sstable() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(&dir).memtable_max_entries(3);
        let engine = Engine::open(&config).expect("Failed to open engine");

        // The third put flushes the memtable, so these live only in
        // the SSTable afterwards.
        engine.put("paymentA", "approved").await.expect("Put failed");
        engine.put("paymentB", "declined").await.expect("Put failed");
        engine.put("paymentC", "pending").await.expect("Put failed");
        // This one stays in the memtable.
        engine.put("paymentD", "approved").await.expect("Put failed");

        let results = engine.range("paymentA", "paymentD").expect("Range failed");
        assert_eq!(results.len(), 4);
        assert_eq!(results.get("paymentB").map(String::as_str), Some("declined"));
        assert_eq!(results.get("paymentD").map(String::as_str), Some("approved"));

        let single = engine.range("paymentC", "paymentC").expect("Range failed");
        assert_eq!(single.len(), 1);

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_range_memtable_wins_over_sstable() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = Engine::open(&test_config(&dir)).expect("Failed to open engine");

        // Force the tables apart to pin down the merge precedence.
        engine.sstable.write("key", "stale").expect("Write failed");
        engine.memtable.set("key", "fresh");

        let results = engine.range("key", "key").expect("Range failed");
        assert_eq!(results.get("key").map(String::as_str), Some("fresh"));
        assert_eq!(engine.get("key").expect("Get failed"), "fresh");

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_range_excludes_deleted_keys() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = Engine::open(&test_config(&dir)).expect("Failed to open engine");

        engine.put("a", "1").await.expect("Put failed");
        engine.put("b", "2").await.expect("Put failed");
        engine.delete("a").expect("Delete failed");

        let results = engine.range("a", "z").expect("Range failed");
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("b"));

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_memtable_flush_keeps_reads_working() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(&dir).memtable_max_entries(3);
        let engine = Engine::open(&config).expect("Failed to open engine");

        engine.put("txn1", "a").await.expect("Put failed");
        engine.put("txn2", "b").await.expect("Put failed");
        engine.put("txn3", "c").await.expect("Put failed"); // triggers flush

        // Served from the SSTable now.
        assert_eq!(engine.get("txn1").expect("Get failed"), "a");
        assert_eq!(engine.get("txn3").expect("Get failed"), "c");

        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_restart_after_clean_close() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(&dir);

        {
            let engine = Engine::open(&config).expect("Failed to open engine");
            engine.put("txn123", "approved").await.expect("Put failed");
            engine.close().await.expect("Failed to close");
        }

        let engine = Engine::open(&config).expect("Failed to reopen engine");
        assert_eq!(engine.get("txn123").expect("Get failed"), "approved");
        engine.close().await.expect("Failed to close");
    }

    #[tokio::test]
    async fn test_restart_without_close_recovers_from_wal() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(&dir);

        {
            // No close: the SSTable index is never persisted, so the
            // reopened engine depends on WAL replay.
            let engine = Engine::open(&config).expect("Failed to open engine");
            engine
                .put("txn_before_crash", "processing")
                .await
                .expect("Put failed");
        }

        let engine = Engine::open(&config).expect("Failed to reopen engine");
        assert_eq!(
            engine.get("txn_before_crash").expect("Get failed"),
            "processing"
        );
        engine.close().await.expect("Failed to close");
    }
}
