//! Write-ahead log.
//!
//! Every mutation is recorded here before it is considered durable.
//! Entries are plain `key:value` lines appended to the active file
//! under `dir`; full files rotate to a new `wal_<n>.log` whose numeric
//! suffix is strictly monotonic, and retention keeps the newest few.
//!
//! Appends are asynchronous by default: the entry lands on a bounded
//! queue drained by a background flusher task (see [`flusher`]), and
//! degrades to an inline write when the queue is full. [`Wal::flush`]
//! sends a barrier through the flusher and resolves once everything
//! queued before it is on stable storage, so `append` followed by
//! `flush` is a durable commit. Setting `TEST_MODE=true` (or opening
//! with [`Wal::open_with`]) makes every append write inline instead.

mod flusher;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// How often the background flusher forces buffered entries to disk.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Rotate the active file once it grows past this size.
pub const MAX_WAL_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated files retention keeps.
pub const RETENTION_COUNT: usize = 5;

/// Capacity of the asynchronous append queue.
pub const QUEUE_DEPTH: usize = 1000;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// The active file and its buffered writer. Shared between callers
/// and the flusher task behind one mutex.
pub(crate) struct Writer {
    dir: PathBuf,
    path: PathBuf,
    suffix: u64,
    file: File,
    writer: BufWriter<File>,
}

impl Writer {
    fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let path = match wal_files(dir)?.pop() {
            Some(latest) => latest,
            None => dir.join("wal_1.log"),
        };
        let suffix = parse_suffix(&path).unwrap_or(1);

        let file = File::options().create(true).append(true).open(&path)?;
        let writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file.try_clone()?);

        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            suffix,
            file,
            writer,
        })
    }

    /// Appends one pre-serialized entry, then rotates if the active
    /// file has outgrown the size limit.
    pub(crate) fn write_entry(&mut self, entry: &str) -> Result<()> {
        self.writer.write_all(entry.as_bytes())?;
        self.maybe_rotate()
    }

    /// Pushes buffered bytes to the OS and the OS to stable storage.
    pub(crate) fn flush_sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Flushes user-space buffers only; used before in-process reads.
    fn flush_buffer(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn maybe_rotate(&mut self) -> Result<()> {
        if self.file.metadata()?.len() <= MAX_WAL_SIZE {
            return Ok(());
        }

        self.flush_sync()?;

        // Strictly monotonic suffix, even for rotations within the
        // same second.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.suffix = now.max(self.suffix + 1);

        let path = self.dir.join(format!("wal_{}.log", self.suffix));
        let file = File::options().create(true).append(true).open(&path)?;

        tracing::info!(from = %self.path.display(), to = %path.display(), "Rotating WAL");
        self.writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file.try_clone()?);
        self.file = file;
        self.path = path;

        self.prune_retained()
    }

    /// Removes rotated files beyond the retention count, oldest first.
    fn prune_retained(&self) -> Result<()> {
        let files = wal_files(&self.dir)?;
        if files.len() > RETENTION_COUNT {
            for stale in &files[..files.len() - RETENTION_COUNT] {
                if let Err(e) = fs::remove_file(stale) {
                    tracing::warn!(path = %stale.display(), error = %e, "Failed to prune WAL file");
                }
            }
        }
        Ok(())
    }
}

/// Append-only durability log with a background flusher.
pub struct Wal {
    writer: Arc<Mutex<Writer>>,
    dir: PathBuf,
    sync_writes: bool,
    entry_tx: mpsc::Sender<String>,
    flush_tx: mpsc::Sender<oneshot::Sender<Result<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Opens the log under `dir`, resuming the lexicographically
    /// latest `wal_*.log` file. Must be called within a Tokio
    /// runtime; the flusher task is spawned here. Synchronous writes
    /// are selected when `TEST_MODE=true` is set in the environment.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let sync_writes = std::env::var("TEST_MODE").as_deref() == Ok("true");
        Self::open_with(dir, sync_writes)
    }

    /// Like [`Wal::open`], with the durability mode chosen by the
    /// caller instead of the environment.
    pub fn open_with(dir: impl Into<PathBuf>, sync_writes: bool) -> Result<Self> {
        let dir = dir.into();
        let writer = Arc::new(Mutex::new(Writer::open(&dir)?));

        let (entry_tx, entry_rx) = mpsc::channel(QUEUE_DEPTH);
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(flusher::run(
            writer.clone(),
            entry_rx,
            flush_rx,
            shutdown_rx,
        ));

        Ok(Self {
            writer,
            dir,
            sync_writes,
            entry_tx,
            flush_tx,
            shutdown_tx,
            flusher: Mutex::new(Some(handle)),
        })
    }

    /// Accepts a mutation for the durability path. In asynchronous
    /// mode the entry is queued, degrading to an inline (but not yet
    /// fsynced) write when the queue is full; in synchronous mode it
    /// is written and flushed inline under the writer mutex.
    pub fn append(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Err(Error::InvalidEntry("empty key or value".to_string()));
        }

        let entry = format!("{key}:{value}\n");
        if self.sync_writes {
            let mut writer = self.writer.lock()?;
            writer.write_entry(&entry)?;
            return writer.flush_sync();
        }

        match self.entry_tx.try_send(entry) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(entry))
            | Err(mpsc::error::TrySendError::Closed(entry)) => self.write_inline(&entry),
        }
    }

    fn write_inline(&self, entry: &str) -> Result<()> {
        let mut writer = self.writer.lock()?;
        writer.write_entry(entry)
    }

    /// Forces every accepted entry to stable storage. In asynchronous
    /// mode this sends a barrier through the flusher, which drains
    /// the queue and fsyncs before acknowledging.
    pub async fn flush(&self) -> Result<()> {
        if !self.sync_writes {
            let (ack_tx, ack_rx) = oneshot::channel();
            if self.flush_tx.send(ack_tx).await.is_ok() {
                if let Ok(result) = ack_rx.await {
                    return result;
                }
            }
            // Flusher already stopped; fall back to an inline flush.
        }
        self.writer.lock()?.flush_sync()
    }

    /// Reads the retained WAL files in creation order and folds them
    /// into key -> last-seen-value. Malformed lines are skipped with
    /// a warning; only I/O failures are errors.
    pub fn replay(&self) -> Result<BTreeMap<String, String>> {
        // Hold the writer lock for the duration so entries buffered in
        // user space become visible and no append interleaves.
        let mut writer = self.writer.lock()?;
        writer.flush_buffer()?;

        let mut data = BTreeMap::new();
        for path in wal_files(&self.dir)? {
            let file = File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                match line.split_once(':') {
                    Some((key, value)) => {
                        data.insert(key.to_string(), value.to_string());
                    }
                    None => tracing::warn!(line = %line, "Skipping malformed WAL entry"),
                }
            }
        }
        Ok(data)
    }

    /// Stops the background flusher (draining the queue on the way
    /// out), then flushes and syncs the active file.
    pub async fn close(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(());

        let handle = self.flusher.lock()?.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "WAL flusher task join failed");
            }
        }

        self.writer.lock()?.flush_sync()
    }

    /// Path of the file appends currently land in.
    pub fn active_path(&self) -> Result<PathBuf> {
        Ok(self.writer.lock()?.path.clone())
    }
}

/// All `wal_*.log` files under `dir`, sorted by name (and therefore
/// by creation order).
fn wal_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let name = path.file_name()?.to_str()?;
            if name.starts_with("wal_") && name.ends_with(".log") {
                Some(path)
            } else {
                None
            }
        })
        .collect();
    files.sort();
    Ok(files)
}

fn parse_suffix(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("wal_")?
        .parse()
        .ok()
}
