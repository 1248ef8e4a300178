use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for previous-state persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Persist the store to disk
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Directory holding store files
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Interval between flushes (seconds)
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,

    /// Number of store files to keep (delete oldest)
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_directory() -> PathBuf {
    PathBuf::from("/var/lib/powercalc/store")
}

fn default_flush_interval() -> u64 {
    60
}

fn default_keep_count() -> usize {
    3
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            directory: default_directory(),
            flush_interval_seconds: default_flush_interval(),
            keep_count: default_keep_count(),
        }
    }
}
