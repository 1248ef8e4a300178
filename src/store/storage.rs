use crate::store::StoreSnapshot;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

const FILE_PREFIX: &str = "store-";

/// Directory of rotated store files
pub struct FileStorage {
    directory: PathBuf,
    keep_count: usize,
    generation: AtomicU64,
}

impl FileStorage {
    pub fn new(directory: impl Into<PathBuf>, keep_count: usize) -> Self {
        Self {
            directory: directory.into(),
            keep_count: keep_count.max(1),
            generation: AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write a new store file and delete the oldest beyond `keep_count`
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.directory).context("Failed to create store directory")?;

        let path = self.next_path();
        snapshot.save_to_file(&path)?;

        self.cleanup_old_files()?;
        Ok(path)
    }

    /// Load the newest readable store file
    ///
    /// Returns None if the directory is missing, empty, or every file is corrupt.
    pub fn load_latest(&self) -> Result<Option<StoreSnapshot>> {
        if !self.directory.exists() {
            info!(
                directory = %self.directory.display(),
                "Store directory does not exist, starting empty"
            );
            return Ok(None);
        }

        let mut files = self.list_files()?;
        if files.is_empty() {
            info!("No store files found, starting empty");
            return Ok(None);
        }

        // Newest first, file names sort by timestamp
        files.sort_by(|a, b| b.cmp(a));

        for path in files {
            match StoreSnapshot::load_from_file(&path) {
                Ok(snapshot) => {
                    info!(
                        path = %path.display(),
                        values = snapshot.value_count(),
                        "Loaded previous state store"
                    );
                    return Ok(Some(snapshot));
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Corrupt store file, trying next oldest"
                    );
                }
            }
        }

        error!("All store files are corrupt, starting empty");
        Ok(None)
    }

    /// Format: store-{timestamp}-{generation}.json.gz
    fn next_path(&self) -> PathBuf {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        self.directory
            .join(format!("{}{}-{:06}.json.gz", FILE_PREFIX, timestamp, generation))
    }

    fn cleanup_old_files(&self) -> Result<()> {
        let mut files = self.list_files()?;
        if files.len() <= self.keep_count {
            return Ok(());
        }

        files.sort();
        let delete_count = files.len() - self.keep_count;

        for path in &files[..delete_count] {
            if let Err(e) = fs::remove_file(path) {
                error!(error = %e, path = %path.display(), "Failed to delete old store file");
            } else {
                info!(path = %path.display(), "Deleted old store file");
            }
        }

        Ok(())
    }

    pub(crate) fn list_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.directory).context("Failed to read store directory")?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_file() {
                if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
                    if filename.starts_with(FILE_PREFIX)
                        && (filename.ends_with(".json.gz") || filename.ends_with(".json"))
                    {
                        files.push(path);
                    }
                }
            }
        }

        Ok(files)
    }
}
