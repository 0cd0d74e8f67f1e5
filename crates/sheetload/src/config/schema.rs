use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::default_database_path;

pub const SUPPORTED_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_version")]
    pub version: String,
    /// Rows per job.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Imports with more data rows than this are rejected before anything
    /// is persisted.
    #[serde(default)]
    pub max_rows: Option<u64>,
    #[serde(default)]
    pub header_offset: u64,
    #[serde(default)]
    pub active_sheet: usize,
    /// Forces streaming (`true`) or whole-file (`false`) processing.
    /// Decided per file when absent.
    #[serde(default)]
    pub streaming: Option<bool>,
    /// Files larger than this many bytes are streamed.
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue")]
    pub default_queue: String,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub staging_directory: Option<PathBuf>,
    /// Keeps staged local sources after completion.
    #[serde(default)]
    pub keep_local_sources: bool,
    /// Completed imports older than this are removed by cleanup. 0 disables it.
    #[serde(default = "default_auto_cleanup_days")]
    pub auto_cleanup_days: u32,
    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: String,
}

fn default_version() -> String {
    SUPPORTED_VERSION.to_string()
}

fn default_chunk_size() -> u64 {
    100
}

fn default_streaming_threshold() -> u64 {
    1_048_576
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue() -> String {
    "default".to_string()
}

fn default_auto_cleanup_days() -> u32 {
    30
}

fn default_csv_delimiter() -> String {
    ",".to_string()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            chunk_size: default_chunk_size(),
            max_rows: None,
            header_offset: 0,
            active_sheet: 0,
            streaming: None,
            streaming_threshold: default_streaming_threshold(),
            worker_count: default_worker_count(),
            default_queue: default_queue(),
            database_path: None,
            staging_directory: None,
            keep_local_sources: false,
            auto_cleanup_days: default_auto_cleanup_days(),
            csv_delimiter: default_csv_delimiter(),
        }
    }
}

impl ImportConfig {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(default_database_path)
    }

    pub fn staging_directory(&self) -> PathBuf {
        self.staging_directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sheetload"))
    }

    /// The delimiter as a byte. Validation guarantees a single ASCII character.
    pub fn delimiter(&self) -> u8 {
        match self.csv_delimiter.as_bytes() {
            [byte] => *byte,
            _ => b',',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ImportConfig::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.max_rows, None);
        assert_eq!(config.streaming_threshold, 1_048_576);
        assert_eq!(config.default_queue, "default");
        assert_eq!(config.auto_cleanup_days, 30);
        assert_eq!(config.delimiter(), b',');
        assert!(config.worker_count >= 1);
        assert!(config.staging_directory().ends_with("sheetload"));
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = ImportConfig {
            database_path: Some(PathBuf::from("/data/imports.db")),
            staging_directory: Some(PathBuf::from("/data/staging")),
            csv_delimiter: ";".to_string(),
            ..ImportConfig::default()
        };
        assert_eq!(config.database_path(), Some(PathBuf::from("/data/imports.db")));
        assert_eq!(config.staging_directory(), PathBuf::from("/data/staging"));
        assert_eq!(config.delimiter(), b';');
    }
}
