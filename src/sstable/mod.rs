pub mod index;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::record::Record;

use index::Index;

/// Append-only persistent key-value table.
///
/// The data file holds one JSON record per line; a sidecar
/// `<path>.index` file maps each key to the byte offset of its newest
/// record. Because every write flushes and fsyncs before the index is
/// updated, an indexed key is always readable.
pub struct SSTable {
    inner: RwLock<Inner>,
    path: PathBuf,
    index_path: PathBuf,
}

struct Inner {
    file: File,
    writer: BufWriter<File>,
    index: Index,
}

impl Inner {
    /// Appends one record and returns its byte offset. The caller
    /// decides what happens to the index.
    fn append_record(&mut self, record: &Record) -> Result<u64> {
        let offset = self.file.metadata()?.len();
        self.writer.write_all(&record.to_line()?)?;
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(offset)
    }
}

impl SSTable {
    /// Opens (or creates) the data file at `path` and loads the
    /// sidecar index.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index_path = index_path_for(&path);

        let file = File::options()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let writer = BufWriter::new(file.try_clone()?);
        let index = Index::load(&index_path)?;

        Ok(Self {
            inner: RwLock::new(Inner {
                file,
                writer,
                index,
            }),
            path,
            index_path,
        })
    }

    /// Appends a live record and points the index at it. On return
    /// the record is on stable storage.
    pub fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write()?;
        let offset = inner.append_record(&Record::live(key, value))?;
        inner.index.insert(key.to_string(), offset);
        Ok(())
    }

    /// Reads the newest value for `key` via the index. Each call uses
    /// its own reader, so concurrent reads do not contend on a shared
    /// file position.
    pub fn read(&self, key: &str) -> Result<String> {
        let inner = self.inner.read()?;
        let offset = inner
            .index
            .get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;

        let mut reader = BufReader::new(File::open(&self.path)?);
        match read_record_at(&mut reader, offset)? {
            Some(record) if record.key == key => match record.value.live() {
                Some(value) => Ok(value.to_string()),
                None => Err(Error::KeyNotFound(key.to_string())),
            },
            _ => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("index for {key} points at a corrupt record"),
            ))),
        }
    }

    /// Returns the live pairs whose keys lie within `[start, end]`
    /// inclusive, in index order. One reader is reused across the
    /// slice; unreadable records are skipped with a warning.
    pub fn read_range(&self, start: &str, end: &str) -> Result<BTreeMap<String, String>> {
        let inner = self.inner.read()?;
        let slice = inner.index.range(start, end);

        let mut results = BTreeMap::new();
        if slice.is_empty() {
            return Ok(results);
        }

        let mut reader = BufReader::new(File::open(&self.path)?);
        for (key, offset) in slice {
            match read_record_at(&mut reader, offset)? {
                Some(record) if record.key == key => {
                    if let Some(value) = record.value.live() {
                        results.insert(key, value.to_string());
                    }
                }
                _ => tracing::warn!(key = %key, offset, "Skipping corrupt record in range read"),
            }
        }

        Ok(results)
    }

    /// Removes `key`: appends a tombstone record (so compaction sees
    /// the delete), drops the index entry and persists the index, all
    /// in one critical section.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write()?;
        if inner.index.get(key).is_none() {
            return Err(Error::KeyNotFound(key.to_string()));
        }

        inner.append_record(&Record::tombstone(key))?;
        inner.index.remove(key);
        inner.index.save(&self.index_path)?;
        Ok(())
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes and fsyncs the data file and persists the index.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write()?;
        inner.writer.flush()?;
        inner.file.sync_all()?;
        inner.index.save(&self.index_path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sidecar index path: `<data path>.index`.
fn index_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".index");
    PathBuf::from(name)
}

/// Reads the single newline-delimited record at `offset`.
fn read_record_at(reader: &mut BufReader<File>, offset: u64) -> Result<Option<Record>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(Record::from_line(&line))
}
