use crate::store::{FileStorage, PreviousStateStore, StoreConfig};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

/// Periodically persists the previous-state store
pub struct StoreFlusher {
    store: Arc<PreviousStateStore>,
    storage: FileStorage,
    config: StoreConfig,
}

impl StoreFlusher {
    pub fn new(store: Arc<PreviousStateStore>, config: StoreConfig) -> Self {
        let storage = FileStorage::new(config.directory.clone(), config.keep_count);
        Self {
            store,
            storage,
            config,
        }
    }

    /// Run background flush loop
    ///
    /// Runs until the task is cancelled. Failed flushes are logged and retried
    /// on the next tick.
    pub async fn run_flush_loop(&self) {
        if !self.config.enabled {
            info!("Store persistence disabled, exiting flush loop");
            return;
        }

        info!(
            interval_seconds = self.config.flush_interval_seconds,
            directory = %self.config.directory.display(),
            keep_count = self.config.keep_count,
            "Starting store flusher"
        );

        let mut timer = interval(Duration::from_secs(self.config.flush_interval_seconds.max(1)));
        // First tick completes immediately
        timer.tick().await;

        loop {
            timer.tick().await;

            if let Err(e) = self.flush_now() {
                error!(error = %e, "Failed to flush store");
            }
        }
    }

    /// Write the store if it changed since the last flush; returns whether a file was written
    pub fn flush_now(&self) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        if !self.store.take_dirty() {
            debug!("Store unchanged, skipping flush");
            return Ok(false);
        }

        let snapshot = self.store.snapshot();
        match self.storage.save(&snapshot) {
            Ok(path) => {
                info!(
                    values = snapshot.value_count(),
                    path = %path.display(),
                    "Store flushed"
                );
                Ok(true)
            }
            Err(e) => {
                self.store.mark_dirty();
                Err(e)
            }
        }
    }
}
