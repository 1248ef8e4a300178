use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod config;
pub mod flusher;
pub mod storage;

pub use config::StoreConfig;
pub use flusher::StoreFlusher;
pub use storage::FileStorage;

#[cfg(test)]
mod tests;

const STORE_VERSION: &str = "1";

/// Last raw value seen for one key
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: f64,
    pub last_updated: DateTime<Utc>,
}

/// Key of a group's previous-value slot for one member
pub fn member_key(group_id: &str, member_id: &str) -> String {
    format!("{}::{}", group_id, member_id)
}

/// Keyed previous values and accumulated totals.
///
/// Mutated synchronously by the accounting path; a flush only reads it.
/// Writes set a dirty flag so a clean store is never re-written.
#[derive(Debug, Default)]
pub struct PreviousStateStore {
    values: DashMap<String, StoredValue>,
    dirty: AtomicBool,
}

impl PreviousStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store populated from a persisted snapshot; starts clean
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            values: snapshot.values.into_iter().collect(),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.get(key).map(|entry| *entry.value())
    }

    pub fn set(&self, key: &str, value: f64, last_updated: DateTime<Utc>) {
        self.values.insert(
            key.to_string(),
            StoredValue {
                value,
                last_updated,
            },
        );
        self.dirty.store(true, Ordering::Release);
    }

    pub fn remove(&self, key: &str) -> Option<StoredValue> {
        let removed = self.values.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// Drop every member slot of a group, returning how many were removed
    pub fn clear_group(&self, group_id: &str) -> usize {
        let prefix = format!("{}::", group_id);
        let before = self.values.len();
        self.values.retain(|key, _| !key.starts_with(&prefix));
        let removed = before - self.values.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clear the dirty flag, returning whether it was set
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            store_version: STORE_VERSION.to_string(),
            created_at: Utc::now(),
            values: self
                .values
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

/// Persisted form of the store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Format version (for future schema evolution)
    pub store_version: String,

    pub created_at: DateTime<Utc>,

    /// key -> last value
    pub values: HashMap<String, StoredValue>,
}

impl StoreSnapshot {
    /// Save as compressed JSON (gzip)
    ///
    /// Uses atomic write: writes to .tmp file, fsyncs, then renames.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).context("Failed to serialize store to JSON")?;

        let tmp_path = path.with_extension("tmp");

        {
            let tmp_file = File::create(&tmp_path).context("Failed to create temporary store file")?;

            let mut encoder = GzEncoder::new(tmp_file, Compression::default());
            encoder
                .write_all(json.as_bytes())
                .context("Failed to write compressed store data")?;

            let file = encoder.finish().context("Failed to finish compression")?;

            file.sync_all().context("Failed to sync store file to disk")?;
        }

        fs::rename(&tmp_path, path).context("Failed to rename temporary store file")?;

        Ok(())
    }

    /// Load from a compressed (.json.gz) or plain (.json) file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).context("Failed to open store file")?;

        let is_compressed = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "gz")
            .unwrap_or(false);

        let mut json = String::new();
        if is_compressed {
            GzDecoder::new(file)
                .read_to_string(&mut json)
                .context("Failed to decompress store file")?;
        } else {
            let mut file = file;
            file.read_to_string(&mut json).context("Failed to read store file")?;
        }

        serde_json::from_str(&json).context("Failed to deserialize store JSON")
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }
}
