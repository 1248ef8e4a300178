pub mod runtime;
pub use runtime::{apply_env_overrides, apply_overrides};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

// Re-export section types owned by their modules
pub use crate::energy::EnergySettings;
pub use crate::group::GroupConfig;
pub use crate::sensor::PowerSensorConfig;
pub use crate::store::config::StoreConfig;

/// Complete powercalc configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowercalcConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub energy: EnergySettings,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub group: GroupSettings,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub sensors: Vec<PowerSensorConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// Defaults for virtual power sensors
#[derive(Debug, Clone, Deserialize)]
pub struct PowerConfig {
    #[serde(default = "default_power_precision")]
    pub precision: Option<u32>,
    /// Report standby power instead of unavailable when the source is unavailable
    #[serde(default)]
    pub ignore_unavailable_state: bool,
}

fn default_power_precision() -> Option<u32> {
    Some(2)
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            precision: default_power_precision(),
            ignore_unavailable_state: false,
        }
    }
}

/// Group publication settings
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSettings {
    /// Minimum seconds between energy group publications, 0 disables throttling
    #[serde(default = "default_energy_update_interval")]
    pub energy_update_interval_seconds: u64,
    /// Seconds after activation during which every update is published
    #[serde(default = "default_startup_window")]
    pub startup_window_seconds: u64,
}

fn default_energy_update_interval() -> u64 {
    60
}

fn default_startup_window() -> u64 {
    5
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            energy_update_interval_seconds: default_energy_update_interval(),
            startup_window_seconds: default_startup_window(),
        }
    }
}

/// Where profile data lives on disk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryConfig {
    /// Root of `{manufacturer}/{model}/{mode}.csv.gz` lookup tables
    #[serde(default)]
    pub lut_directory: Option<PathBuf>,
    /// Base directory for playbook `.csv` references
    #[serde(default)]
    pub playbook_directory: Option<PathBuf>,
}

/// Load configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<PowercalcConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: PowercalcConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {:?}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::{IntegrationMethod, UnitPrefix};
    use crate::sensor::SensorKind;
    use crate::strategy::StrategyKind;

    #[test]
    fn test_default_config() {
        let config = PowercalcConfig::default();
        assert!(config.store.enabled);
        assert_eq!(config.store.flush_interval_seconds, 60);
        assert_eq!(config.store.keep_count, 3);
        assert_eq!(config.energy.integration_method, IntegrationMethod::Trapezoidal);
        assert_eq!(config.energy.unit(), "kWh");
        assert_eq!(config.power.precision, Some(2));
        assert_eq!(config.group.energy_update_interval_seconds, 60);
        assert_eq!(config.group.startup_window_seconds, 5);
        assert!(config.sensors.is_empty());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [store]
            directory = "/tmp/powercalc"
            flush_interval_seconds = 30

            [energy]
            integration_method = "left"
            unit_prefix = "none"

            [power]
            precision = 1
            ignore_unavailable_state = true

            [group]
            energy_update_interval_seconds = 0

            [library]
            lut_directory = "/usr/share/powercalc/profiles"

            [[sensors]]
            entity_id = "light.kitchen"
            standby_power = 0.4
            calculation = { strategy = "linear", min_power = 1.5, max_power = 9.0 }

            [[sensors]]
            entity_id = "switch.kettle"
            create_energy_sensor = true
            [sensors.calculation]
            strategy = "fixed"
            power = 1800

            [[groups]]
            id = "sensor.kitchen_power"
            kind = "power"
            topology = { type = "custom", members = ["sensor.kitchen_power_1", "sensor.kettle_power"] }
        "#;

        let config: PowercalcConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.store.directory, PathBuf::from("/tmp/powercalc"));
        assert_eq!(config.store.flush_interval_seconds, 30);
        assert_eq!(config.energy.unit_prefix, UnitPrefix::None);
        assert_eq!(config.power.precision, Some(1));
        assert!(config.power.ignore_unavailable_state);
        assert_eq!(config.group.energy_update_interval_seconds, 0);
        assert_eq!(
            config.library.lut_directory,
            Some(PathBuf::from("/usr/share/powercalc/profiles"))
        );
        assert_eq!(config.library.playbook_directory, None);

        assert_eq!(config.sensors.len(), 2);
        let kitchen = &config.sensors[0];
        assert_eq!(kitchen.standby_power, Some(0.4));
        assert_eq!(kitchen.calculation.as_ref().unwrap().kind(), StrategyKind::Linear);
        assert!(config.sensors[1].create_energy_sensor);
        assert_eq!(config.sensors[1].calculation.as_ref().unwrap().kind(), StrategyKind::Fixed);

        assert_eq!(config.groups[0].kind, SensorKind::Power);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [group]
            startup_window_seconds = 10
        "#;

        let config: PowercalcConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.group.startup_window_seconds, 10);
        assert_eq!(config.group.energy_update_interval_seconds, 60);
        assert!(config.store.enabled);
        assert_eq!(config.energy.precision, Some(4));
    }

    #[test]
    fn test_load_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path().join("missing.toml")).is_err());

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[store\nenabled = yes").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}
