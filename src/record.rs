use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reserved value literal marking a deletion in SSTable and
/// compaction records. Only ever written at the disk boundary;
/// in-memory code works with [`Value`].
pub const TOMBSTONE: &str = "DELETE";

/// The value half of a record: either live data or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Live(String),
    Tombstone,
}

impl Value {
    /// Returns the live value, or None for a tombstone.
    pub fn live(&self) -> Option<&str> {
        match self {
            Value::Live(v) => Some(v),
            Value::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }

    fn from_disk(raw: String) -> Self {
        if raw == TOMBSTONE {
            Value::Tombstone
        } else {
            Value::Live(raw)
        }
    }

    fn to_disk(&self) -> &str {
        match self {
            Value::Live(v) => v,
            Value::Tombstone => TOMBSTONE,
        }
    }
}

/// One SSTable data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Value,
}

/// On-disk form of a record: `{"key":K,"value":V}` with standard JSON
/// escaping. The tombstone sentinel lives here and nowhere else.
#[derive(Serialize)]
struct DiskRecord<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct OwnedDiskRecord {
    key: String,
    value: String,
}

impl Record {
    pub fn live(key: impl Into<String>, value: impl Into<String>) -> Self {
        Record {
            key: key.into(),
            value: Value::Live(value.into()),
        }
    }

    pub fn tombstone(key: impl Into<String>) -> Self {
        Record {
            key: key.into(),
            value: Value::Tombstone,
        }
    }

    /// Serializes the record as one newline-terminated JSON line.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let disk = DiskRecord {
            key: &self.key,
            value: self.value.to_disk(),
        };
        let mut line = serde_json::to_vec(&disk)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parses one data line. Returns None for lines that are not a
    /// well-formed record; callers skip those with a warning.
    pub fn from_line(line: &str) -> Option<Record> {
        let disk: OwnedDiskRecord = serde_json::from_str(line.trim_end()).ok()?;
        Some(Record {
            key: disk.key,
            value: Value::from_disk(disk.value),
        })
    }
}
