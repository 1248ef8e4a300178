// Virtual power and energy sensors

use crate::state::{EntityState, STATE_UNAVAILABLE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

mod energy;
mod power;

pub use energy::VirtualEnergySensor;
pub use power::{PowerSensorConfig, VirtualPowerSensor, OFF_STATES};


pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";

/// What a derived sensor measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Power,
    Energy,
}

impl SensorKind {
    pub fn default_unit(&self) -> &'static str {
        match self {
            SensorKind::Power => "W",
            SensorKind::Energy => "kWh",
        }
    }

    /// Multiplier converting `unit` into W or Wh; `None` for units of another kind
    pub fn unit_factor(&self, unit: &str) -> Option<f64> {
        match (self, unit) {
            (SensorKind::Power, "mW") => Some(0.001),
            (SensorKind::Power, "W") => Some(1.0),
            (SensorKind::Power, "kW") => Some(1_000.0),
            (SensorKind::Energy, "Wh") => Some(1.0),
            (SensorKind::Energy, "kWh") => Some(1_000.0),
            (SensorKind::Energy, "MWh") => Some(1_000_000.0),
            _ => None,
        }
    }
}

/// Numeric value of a member state converted to `target_unit`.
///
/// Unknown/unavailable and non-numeric states read as `None`. A member without
/// a unit is assumed to use the kind's default unit.
pub fn read_value(state: &EntityState, kind: SensorKind, target_unit: &str) -> Option<f64> {
    if state.is_unavailable() {
        return None;
    }
    let value = state.numeric_state()?;

    let unit = state
        .attribute_string(ATTR_UNIT_OF_MEASUREMENT)
        .unwrap_or_else(|| kind.default_unit().to_string());
    let (Some(from), Some(to)) = (kind.unit_factor(&unit), kind.unit_factor(target_unit)) else {
        debug!(entity_id = %state.entity_id, unit = %unit, "Unknown unit, using value as is");
        return Some(value);
    };
    Some(value * from / to)
}

/// A freshly computed value of a derived sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorUpdate {
    pub sensor_id: String,
    pub kind: SensorKind,
    /// `None` publishes the sensor as unavailable
    pub value: Option<f64>,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl SensorUpdate {
    /// The update as an entity state, so other sensors and groups can consume it
    pub fn to_entity_state(&self) -> EntityState {
        let state = match self.value {
            Some(value) => value.to_string(),
            None => STATE_UNAVAILABLE.to_string(),
        };
        EntityState::new(&self.sensor_id, &state)
            .with_attribute(ATTR_UNIT_OF_MEASUREMENT, Value::String(self.unit.clone()))
            .at(self.timestamp)
    }
}
