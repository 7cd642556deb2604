use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Configuration for the storage engine and its host.
///
/// `host` and `port` are only consumed by a serving front end; the
/// engine itself uses the paths and the memtable bound.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for a serving host (default: 0.0.0.0)
    pub host: String,

    /// Listen port for a serving host (default: 8080)
    pub port: u16,

    /// Directory holding the rotated WAL files (default: data/wal)
    pub wal_dir: PathBuf,

    /// Path of the SSTable data file; the index lives at
    /// `<path>.index` (default: data/sstable.db)
    pub sstable_path: PathBuf,

    /// Distinct-key bound that triggers a memtable flush
    /// (default: 1000)
    pub memtable_max_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            wal_dir: PathBuf::from("data/wal"),
            sstable_path: PathBuf::from("data/sstable.db"),
            memtable_max_entries: 1000,
        }
    }
}

impl Config {
    /// Reads configuration from a JSON file. A missing file is not an
    /// error: defaults are returned and the fallback is logged.
    /// Fields absent from the file keep their defaults; unknown
    /// fields are ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }

    /// Set the WAL directory
    pub fn wal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.wal_dir = dir.into();
        self
    }

    /// Set the SSTable data file path
    pub fn sstable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sstable_path = path.into();
        self
    }

    /// Set the memtable flush threshold
    pub fn memtable_max_entries(mut self, max: usize) -> Self {
        self.memtable_max_entries = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.wal_dir, PathBuf::from("data/wal"));
        assert_eq!(config.sstable_path, PathBuf::from("data/sstable.db"));
        assert_eq!(config.memtable_max_entries, 1000);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::default()
            .wal_dir("/tmp/test/wal")
            .sstable_path("/tmp/test/sstable.db")
            .memtable_max_entries(3);

        assert_eq!(config.wal_dir, PathBuf::from("/tmp/test/wal"));
        assert_eq!(config.sstable_path, PathBuf::from("/tmp/test/sstable.db"));
        assert_eq!(config.memtable_max_entries, 3);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config =
            Config::load(dir.path().join("absent.json")).expect("Failed to load defaults");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9090, "memtable_max_entries": 16}"#)
            .expect("Failed to write config file");

        let config = Config::load(&path).expect("Failed to load config");
        assert_eq!(config.port, 9090);
        assert_eq!(config.memtable_max_entries, 16);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.wal_dir, PathBuf::from("data/wal"));
    }

    #[test]
    fn test_load_invalid_json_is_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").expect("Failed to write config file");

        assert!(Config::load(&path).is_err());
    }
}
