use crate::config::PowercalcConfig;
use std::path::PathBuf;
use tracing::warn;

pub const ENV_STORE_DIRECTORY: &str = "POWERCALC_STORE_DIRECTORY";
pub const ENV_STORE_FLUSH_INTERVAL: &str = "POWERCALC_STORE_FLUSH_INTERVAL_SECONDS";
pub const ENV_ENERGY_UPDATE_INTERVAL: &str = "POWERCALC_ENERGY_UPDATE_INTERVAL_SECONDS";
pub const ENV_LUT_DIRECTORY: &str = "POWERCALC_LUT_DIRECTORY";

/// Apply overrides from environment variables on top of the loaded file.
pub fn apply_env_overrides(config: &mut PowercalcConfig) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

/// Apply overrides from any variable source; unparsable values keep the file setting
pub fn apply_overrides(config: &mut PowercalcConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup(ENV_STORE_DIRECTORY) {
        if !v.trim().is_empty() {
            config.store.directory = PathBuf::from(v.trim());
        }
    }
    if let Some(v) = lookup(ENV_LUT_DIRECTORY) {
        if !v.trim().is_empty() {
            config.library.lut_directory = Some(PathBuf::from(v.trim()));
        }
    }
    if let Some(v) = lookup(ENV_STORE_FLUSH_INTERVAL) {
        match v.trim().parse::<u64>() {
            Ok(n) => config.store.flush_interval_seconds = n,
            Err(_) => warn!(variable = ENV_STORE_FLUSH_INTERVAL, value = %v, "Ignoring invalid override"),
        }
    }
    if let Some(v) = lookup(ENV_ENERGY_UPDATE_INTERVAL) {
        match v.trim().parse::<u64>() {
            Ok(n) => config.group.energy_update_interval_seconds = n,
            Err(_) => warn!(variable = ENV_ENERGY_UPDATE_INTERVAL, value = %v, "Ignoring invalid override"),
        }
    }
}
