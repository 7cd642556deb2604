use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Bound;
use std::path::Path;

use crate::error::Result;

/// Ordered map from key to the byte offset of its newest record in
/// the data file. Persisted as `<key>:<offset>` lines; keys may not
/// contain `:` or newlines.
#[derive(Debug, Default)]
pub struct Index {
    entries: BTreeMap<String, u64>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the index file. A missing file yields an empty index;
    /// malformed lines are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = BTreeMap::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((key, offset)) => match offset.parse::<u64>() {
                    Ok(offset) => {
                        entries.insert(key.to_string(), offset);
                    }
                    Err(_) => {
                        tracing::warn!(line = %line, "Skipping index entry with bad offset");
                    }
                },
                None => {
                    tracing::warn!(line = %line, "Skipping malformed index entry");
                }
            }
        }

        Ok(Self { entries })
    }

    /// Writes the full index to `path`, replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        for (key, offset) in &self.entries {
            writeln!(writer, "{key}:{offset}")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: String, offset: u64) {
        self.entries.insert(key, offset);
    }

    pub fn remove(&mut self, key: &str) -> Option<u64> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The contiguous slice of indexed keys within `[start, end]`
    /// inclusive, in key order. An inverted range is empty.
    pub fn range(&self, start: &str, end: &str) -> Vec<(String, u64)> {
        if start > end {
            return Vec::new();
        }
        self.entries
            .range::<str, _>((Bound::Included(start), Bound::Included(end)))
            .map(|(k, o)| (k.clone(), *o))
            .collect()
    }
}
