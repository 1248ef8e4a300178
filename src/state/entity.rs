use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const STATE_UNKNOWN: &str = "unknown";
pub const STATE_UNAVAILABLE: &str = "unavailable";
pub const STATE_OFF: &str = "off";
pub const STATE_ON: &str = "on";

/// Current state of one entity, as delivered by a state-change notification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Entity identifier (e.g., "light.kitchen", "sensor.kitchen_power")
    pub entity_id: String,

    /// Raw state string ("on", "off", "23.5", "unavailable", ...)
    pub state: String,

    /// State attributes (brightness, color_mode, unit_of_measurement, ...)
    #[serde(default)]
    pub attributes: HashMap<String, Value>,

    /// Last update timestamp
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    pub fn new(entity_id: &str, state: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.last_updated = timestamp;
        self
    }

    /// True for "unknown" and "unavailable"
    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNKNOWN || self.state == STATE_UNAVAILABLE
    }

    /// State parsed as a number, `None` for non-numeric states
    pub fn numeric_state(&self) -> Option<f64> {
        self.state.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Attribute as a number; numeric strings are accepted, non-finite values are not
    pub fn attribute_f64(&self, name: &str) -> Option<f64> {
        let value = match self.attributes.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }

    /// Attribute rendered as plain text (strings without quotes)
    pub fn attribute_string(&self, name: &str) -> Option<String> {
        self.attributes.get(name).map(value_to_string)
    }
}

/// Render a JSON value the way it appears in a state string
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}
