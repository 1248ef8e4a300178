use anyhow::{Context, Result};
use powercalc::config::{apply_env_overrides, load_config, PowercalcConfig};
use powercalc::lut::{DirectoryLutSource, LutRegistry, LutSource, StaticLutSource};
use powercalc::scheduler::TokioScheduler;
use powercalc::sensor::SensorUpdate;
use powercalc::session::Session;
use powercalc::state::EntityState;
use powercalc::store::{FileStorage, PreviousStateStore, StoreFlusher};
use powercalc::strategy::CsvPlaybookLoader;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "powercalc=info".into()),
        )
        .init();

    info!("Powercalc starting...");

    let mut config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => {
            info!("No config file given, using defaults");
            PowercalcConfig::default()
        }
    };
    apply_env_overrides(&mut config);

    info!(
        sensors = config.sensors.len(),
        groups = config.groups.len(),
        store_directory = %config.store.directory.display(),
        "Configuration loaded"
    );

    // Restore persisted energy totals
    let store = if config.store.enabled {
        let storage = FileStorage::new(config.store.directory.clone(), config.store.keep_count);
        match storage.load_latest().context("Failed to load store")? {
            Some(snapshot) => Arc::new(PreviousStateStore::from_snapshot(snapshot)),
            None => Arc::new(PreviousStateStore::new()),
        }
    } else {
        Arc::new(PreviousStateStore::new())
    };
    info!(values = store.len(), "Store ready");

    let lut_source: Arc<dyn LutSource> = match &config.library.lut_directory {
        Some(dir) => Arc::new(DirectoryLutSource::new(dir.clone())),
        None => {
            warn!("No lut_directory configured, LUT sensors will have no tables");
            Arc::new(StaticLutSource::new())
        }
    };
    let lut_registry = Arc::new(LutRegistry::new(lut_source));
    let playbook_loader = Arc::new(CsvPlaybookLoader::new(config.library.playbook_directory.clone()));
    let (scheduler, mut timers) = TokioScheduler::new();

    let flusher = Arc::new(StoreFlusher::new(Arc::clone(&store), config.store.clone()));
    let mut session = Session::from_config(
        config,
        lut_registry,
        Arc::new(scheduler),
        playbook_loader,
        Arc::clone(&store),
    );

    let flush_handle = {
        let flusher = Arc::clone(&flusher);
        tokio::spawn(async move {
            flusher.run_flush_loop().await;
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line.context("Failed to read stdin")? {
                    Some(line) => line,
                    None => {
                        info!("Input closed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EntityState>(&line) {
                    Ok(state) => log_updates(&session.handle_state(state)),
                    Err(e) => warn!(error = %e, "Ignoring invalid state line"),
                }
            }
            Some(fired) = timers.recv() => {
                log_updates(&session.handle_timer(fired));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    flush_handle.abort();
    flusher.flush_now().context("Failed to flush store on shutdown")?;

    let metrics = session.metrics();
    info!(
        notifications = metrics.total_notifications,
        calculations = metrics.calculations,
        unavailable_results = metrics.unavailable_results,
        "Powercalc stopped"
    );

    Ok(())
}

fn log_updates(updates: &[SensorUpdate]) {
    for update in updates {
        match update.value {
            Some(value) => info!(
                sensor_id = %update.sensor_id,
                value = value,
                unit = %update.unit,
                "Sensor updated"
            ),
            None => info!(sensor_id = %update.sensor_id, "Sensor unavailable"),
        }
    }
}
