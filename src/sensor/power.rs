use crate::condition::Condition;
use crate::config::PowerConfig;
use crate::energy::round_to;
use crate::entity::{ColorMode, DeviceInfo, MonitoredEntity};
use crate::error::{PowercalcError, Result};
use crate::profile::{PowerProfile, ProfileDefinition, SubProfileSelector};
use crate::scheduler::TimerFired;
use crate::state::{EntityState, StateReader};
use crate::strategy::{
    CalculationContext, PowerCalculationStrategy, StrategyConfig, StrategyFactory, StrategyKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Source states that mean the device is switched off
pub const OFF_STATES: &[&str] = &["off", "standby", "not_home"];

/// One `[[sensors]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerSensorConfig {
    /// Entity whose power is estimated
    pub entity_id: String,
    /// Sensor id, defaults to `sensor.{object_id}_power`
    #[serde(default)]
    pub id: Option<String>,
    /// Explicit strategy; without it the profile's declared strategy is used
    #[serde(default)]
    pub calculation: Option<StrategyConfig>,
    #[serde(default)]
    pub profile: Option<ProfileDefinition>,
    #[serde(default)]
    pub standby_power: Option<f64>,
    #[serde(default)]
    pub multiply_factor: Option<f64>,
    #[serde(default)]
    pub multiply_factor_standby: bool,
    /// Reported while the source is unknown/unavailable
    #[serde(default)]
    pub unavailable_power: Option<f64>,
    #[serde(default)]
    pub ignore_unavailable_state: Option<bool>,
    #[serde(default)]
    pub calculation_enabled_condition: Option<Condition>,
    #[serde(default)]
    pub precision: Option<u32>,
    /// Values for the profile's `[[field]]` placeholders
    #[serde(default)]
    pub custom_fields: HashMap<String, Value>,
    #[serde(default)]
    pub create_energy_sensor: bool,
    #[serde(default)]
    pub energy_sensor_id: Option<String>,
    #[serde(default)]
    pub supported_color_modes: Vec<ColorMode>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub device: Option<DeviceInfo>,
}

impl PowerSensorConfig {
    pub fn new(entity_id: &str, calculation: StrategyConfig) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            id: None,
            calculation: Some(calculation),
            profile: None,
            standby_power: None,
            multiply_factor: None,
            multiply_factor_standby: false,
            unavailable_power: None,
            ignore_unavailable_state: None,
            calculation_enabled_condition: None,
            precision: None,
            custom_fields: HashMap::new(),
            create_energy_sensor: false,
            energy_sensor_id: None,
            supported_color_modes: Vec::new(),
            platform: None,
            device: None,
        }
    }
}

/// Power estimate for one monitored entity: a strategy plus standby,
/// multiplier, unavailable handling and sub-profile switching around it
pub struct VirtualPowerSensor {
    id: String,
    source: MonitoredEntity,
    config: PowerSensorConfig,
    profile: Option<PowerProfile>,
    selector: Option<SubProfileSelector>,
    strategy: Box<dyn PowerCalculationStrategy>,
    standby_power: f64,
    standby_power_on: f64,
    ignore_unavailable_state: bool,
    precision: Option<u32>,
    power: Option<f64>,
}

impl VirtualPowerSensor {
    pub fn new(config: PowerSensorConfig, defaults: &PowerConfig, factory: &StrategyFactory) -> Result<Self> {
        let mut source = MonitoredEntity::from_entity_id(&config.entity_id)
            .map_err(|e| PowercalcError::SensorConfiguration(e.to_string()))?
            .with_color_modes(config.supported_color_modes.clone());
        source.platform = config.platform.clone();
        source.device = config.device.clone();

        let id = config
            .id
            .clone()
            .unwrap_or_else(|| format!("sensor.{}_power", source.object_id));

        let mut profile = config.profile.clone().map(PowerProfile::new).transpose()?;
        if let Some(profile) = profile.as_mut() {
            profile.apply_custom_fields(&config.custom_fields)?;
        }
        let selector = profile
            .as_ref()
            .and_then(PowerProfile::sub_profile_select)
            .map(|select| SubProfileSelector::new(select, &source))
            .transpose()?;

        if let Some(condition) = &config.calculation_enabled_condition {
            condition.validate()?;
        }

        let strategy = factory.create(config.calculation.as_ref(), &source, profile.as_ref(), &id)?;

        let standby_power = config
            .standby_power
            .or_else(|| profile.as_ref().map(PowerProfile::standby_power))
            .unwrap_or(0.0);
        let standby_power_on = profile.as_ref().map_or(0.0, PowerProfile::standby_power_on);

        info!(
            sensor_id = %id,
            entity_id = %source.entity_id,
            strategy = %strategy.kind(),
            "Virtual power sensor created"
        );

        Ok(Self {
            id,
            ignore_unavailable_state: config
                .ignore_unavailable_state
                .unwrap_or(defaults.ignore_unavailable_state),
            precision: config.precision.or(defaults.precision),
            source,
            config,
            profile,
            selector,
            strategy,
            standby_power,
            standby_power_on,
            power: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &MonitoredEntity {
        &self.source
    }

    pub fn config(&self) -> &PowerSensorConfig {
        &self.config
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn profile(&self) -> Option<&PowerProfile> {
        self.profile.as_ref()
    }

    /// Last published power
    pub fn power(&self) -> Option<f64> {
        self.power
    }

    /// Entity ids whose changes must trigger a recalculation
    pub fn tracked_entities(&self) -> Vec<String> {
        let mut entities = vec![self.source.entity_id.clone()];
        entities.extend(self.strategy.tracked_references());
        if let Some(selector) = &self.selector {
            entities.extend(selector.tracking_references());
        }
        if let Some(condition) = &self.config.calculation_enabled_condition {
            entities.extend(condition.referenced_entities());
        }
        let mut seen = std::collections::HashSet::new();
        entities.retain(|id| seen.insert(id.clone()));
        entities
    }

    /// Calculate power for the source entity's current state
    pub fn calculate(
        &mut self,
        state: &EntityState,
        states: &dyn StateReader,
        factory: &StrategyFactory,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        self.switch_sub_profile(state, states, factory);

        let power = self.calculate_raw(state, states, now);
        debug!(sensor_id = %self.id, state = %state.state, power = ?power, "Power calculated");
        self.power = power;
        power
    }

    fn calculate_raw(&mut self, state: &EntityState, states: &dyn StateReader, now: DateTime<Utc>) -> Option<f64> {
        if state.is_unavailable() {
            if let Some(power) = self.config.unavailable_power {
                return Some(round_to(power, self.precision));
            }
            return self.ignore_unavailable_state.then(|| self.standby());
        }

        if let Some(condition) = &self.config.calculation_enabled_condition {
            if !condition.evaluate(state, states) {
                return Some(self.standby());
            }
        }

        let is_off = OFF_STATES.contains(&state.state.as_str());
        if is_off && !self.strategy.can_calculate_standby() {
            return Some(self.standby());
        }

        let ctx = CalculationContext {
            source: &self.source,
            states,
            now,
        };
        let power = self.strategy.calculate(state, &ctx)?;
        Some(self.adjust(power, is_off))
    }

    /// Multiply factor, on-state standby and rounding for a strategy result
    fn adjust(&self, power: f64, is_off: bool) -> f64 {
        let mut power = power * self.config.multiply_factor.unwrap_or(1.0);
        if !is_off {
            power += self.standby_power_on;
        }
        round_to(power, self.precision)
    }

    fn standby(&self) -> f64 {
        let factor = match self.config.multiply_factor {
            Some(factor) if self.config.multiply_factor_standby => factor,
            _ => 1.0,
        };
        round_to(self.standby_power * factor, self.precision)
    }

    /// Select the sub-profile for this state; on change rebuild the strategy
    fn switch_sub_profile(&mut self, state: &EntityState, states: &dyn StateReader, factory: &StrategyFactory) {
        let (Some(selector), Some(profile)) = (&self.selector, self.profile.as_mut()) else {
            return;
        };

        let selected = selector.select_sub_profile(state, &self.source, states);
        if profile.sub_profile() == Some(selected.as_str()) {
            return;
        }
        if let Err(e) = profile.select_sub_profile(&selected) {
            warn!(sensor_id = %self.id, sub_profile = %selected, error = %e, "Could not select sub profile");
            return;
        }

        match factory.create(self.config.calculation.as_ref(), &self.source, self.profile.as_ref(), &self.id) {
            Ok(strategy) => self.strategy = strategy,
            Err(e) => {
                warn!(sensor_id = %self.id, sub_profile = %selected, error = %e, "Could not rebuild strategy for sub profile")
            }
        }
        if let Some(profile) = &self.profile {
            self.standby_power = self.config.standby_power.unwrap_or_else(|| profile.standby_power());
            self.standby_power_on = profile.standby_power_on();
        }
    }

    /// Handle a timer the strategy scheduled; returns the power to publish
    pub fn on_timer(&mut self, fired: &TimerFired, states: &dyn StateReader) -> Option<f64> {
        let ctx = CalculationContext {
            source: &self.source,
            states,
            now: fired.fired_at,
        };
        let power = self.strategy.on_timer(fired, &ctx)?;
        let is_off = states
            .get_state(&self.source.entity_id)
            .is_some_and(|state| OFF_STATES.contains(&state.state.as_str()));
        let power = self.adjust(power, is_off);
        self.power = Some(power);
        Some(power)
    }

    pub fn activate_playbook(&mut self, playbook_id: &str) -> Result<()> {
        let id = self.id.clone();
        self.strategy
            .playbook_mut()
            .ok_or_else(|| PowercalcError::UnsupportedMode(format!("{} has no playbook strategy", id)))?
            .activate_playbook(playbook_id)
    }

    pub fn stop_playbook(&mut self) -> Result<()> {
        let id = self.id.clone();
        self.strategy
            .playbook_mut()
            .ok_or_else(|| PowercalcError::UnsupportedMode(format!("{} has no playbook strategy", id)))?
            .stop_playbook();
        Ok(())
    }
}
