use crate::entity::MonitoredEntity;
use crate::error::{PowercalcError, Result};
use crate::state::{EntityState, StateReader, STATE_OFF};
use crate::strategy::{CalculationContext, PowerCalculationStrategy, StrategyKind};
use crate::template::Template;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Domains whose power depends on the mode they are in
const DOMAINS_REQUIRING_STATES_POWER: &[&str] = &["climate", "vacuum"];

/// A constant or a template rendering to one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PowerValue {
    Number(f64),
    Template(Template),
}

impl PowerValue {
    fn resolve(&self, states: &dyn StateReader) -> Option<f64> {
        match self {
            PowerValue::Number(n) => Some(*n),
            PowerValue::Template(template) => match template.render_f64(states) {
                Ok(power) => Some(power),
                Err(e) => {
                    warn!(template = %template.source(), error = %e, "Could not render power template");
                    None
                }
            },
        }
    }

    fn referenced_entities(&self) -> Vec<String> {
        match self {
            PowerValue::Number(_) => Vec::new(),
            PowerValue::Template(template) => template.referenced_entities(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedConfig {
    #[serde(default)]
    pub power: Option<PowerValue>,
    /// State (or `attribute|value`) -> power
    #[serde(default)]
    pub states_power: BTreeMap<String, PowerValue>,
}

/// Constant power, a template, or a per-state table
pub struct FixedStrategy {
    config: FixedConfig,
}

impl FixedStrategy {
    pub fn new(config: FixedConfig) -> Self {
        Self { config }
    }

    fn state_power(&self, state: &EntityState) -> Option<&PowerValue> {
        if let Some(value) = self.config.states_power.get(&state.state) {
            return Some(value);
        }

        self.config
            .states_power
            .iter()
            .filter_map(|(key, value)| key.split_once('|').map(|(attr, expected)| (attr, expected, value)))
            .find(|(attr, expected, _)| state.attribute_string(attr).as_deref() == Some(*expected))
            .map(|(_, _, value)| value)
    }
}

impl PowerCalculationStrategy for FixedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fixed
    }

    fn calculate(&mut self, state: &EntityState, ctx: &CalculationContext<'_>) -> Option<f64> {
        if let Some(value) = self.state_power(state) {
            return value.resolve(ctx.states);
        }

        self.config.power.as_ref()?.resolve(ctx.states)
    }

    fn validate(&self, source: &MonitoredEntity) -> Result<()> {
        if DOMAINS_REQUIRING_STATES_POWER.contains(&source.domain.as_str())
            && self.config.states_power.is_empty()
        {
            return Err(PowercalcError::StrategyConfiguration(format!(
                "{} entities need 'states_power', a single 'power' is not enough",
                source.domain
            )));
        }

        if self.config.power.is_none() && self.config.states_power.is_empty() {
            return Err(PowercalcError::StrategyConfiguration(
                "fixed strategy needs 'power' or 'states_power'".to_string(),
            ));
        }

        Ok(())
    }

    fn tracked_references(&self) -> Vec<String> {
        self.config
            .power
            .iter()
            .chain(self.config.states_power.values())
            .flat_map(PowerValue::referenced_entities)
            .collect()
    }

    fn can_calculate_standby(&self) -> bool {
        self.config.states_power.contains_key(STATE_OFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn calculate(config: FixedConfig, state: &EntityState, states: &HashMap<String, EntityState>) -> Option<f64> {
        let source = MonitoredEntity::from_entity_id(&state.entity_id).unwrap();
        let ctx = CalculationContext {
            source: &source,
            states,
            now: Utc::now(),
        };
        FixedStrategy::new(config).calculate(state, &ctx)
    }

    #[test]
    fn test_constant_power() {
        let config: FixedConfig = serde_json::from_value(json!({"power": 20.5})).unwrap();
        let power = calculate(config, &EntityState::new("switch.tv", "on"), &HashMap::new());
        assert_eq!(power, Some(20.5));
    }

    #[test]
    fn test_template_power() {
        let config: FixedConfig = serde_json::from_value(
            json!({"power": "{{ states('input_number.heater') | float }}"}),
        )
        .unwrap();
        let mut states = HashMap::new();
        states.insert(
            "input_number.heater".to_string(),
            EntityState::new("input_number.heater", "1200"),
        );

        let mut strategy = FixedStrategy::new(config.clone());
        assert_eq!(strategy.tracked_references(), vec!["input_number.heater".to_string()]);
        assert_eq!(
            calculate(config, &EntityState::new("switch.heater", "on"), &states),
            Some(1200.0)
        );

        let source = MonitoredEntity::from_entity_id("switch.heater").unwrap();
        let empty = HashMap::new();
        let ctx = CalculationContext {
            source: &source,
            states: &empty,
            now: Utc::now(),
        };
        assert_eq!(strategy.calculate(&EntityState::new("switch.heater", "on"), &ctx), None);
    }

    #[test]
    fn test_states_power_exact_match_first() {
        let config: FixedConfig = serde_json::from_value(json!({
            "states_power": {
                "playing": 8.3,
                "paused": 2.25,
                "media_content_id|Spotify": 5.0
            }
        }))
        .unwrap();

        let playing = EntityState::new("media_player.nest", "playing")
            .with_attribute("media_content_id", json!("Spotify"));
        assert_eq!(calculate(config.clone(), &playing, &HashMap::new()), Some(8.3));

        let idle = EntityState::new("media_player.nest", "idle")
            .with_attribute("media_content_id", json!("Spotify"));
        assert_eq!(calculate(config.clone(), &idle, &HashMap::new()), Some(5.0));

        let unmatched = EntityState::new("media_player.nest", "idle");
        assert_eq!(calculate(config, &unmatched, &HashMap::new()), None);
    }

    #[test]
    fn test_states_power_falls_back_to_power() {
        let config: FixedConfig =
            serde_json::from_value(json!({"power": 3, "states_power": {"heat": 1500}})).unwrap();
        assert_eq!(
            calculate(config, &EntityState::new("climate.room", "fan_only"), &HashMap::new()),
            Some(3.0)
        );
    }

    #[test]
    fn test_validate_requires_states_power_for_climate() {
        let config: FixedConfig = serde_json::from_value(json!({"power": 20})).unwrap();
        let climate = MonitoredEntity::from_entity_id("climate.living_room").unwrap();
        assert!(matches!(
            FixedStrategy::new(config.clone()).validate(&climate),
            Err(PowercalcError::StrategyConfiguration(_))
        ));

        let switch = MonitoredEntity::from_entity_id("switch.living_room").unwrap();
        assert!(FixedStrategy::new(config).validate(&switch).is_ok());
    }

    #[test]
    fn test_validate_requires_some_power() {
        let switch = MonitoredEntity::from_entity_id("switch.a").unwrap();
        assert!(FixedStrategy::new(FixedConfig::default()).validate(&switch).is_err());
    }

    #[test]
    fn test_can_calculate_standby() {
        let with_off: FixedConfig =
            serde_json::from_value(json!({"states_power": {"off": 0.5, "on": 10}})).unwrap();
        assert!(FixedStrategy::new(with_off).can_calculate_standby());

        let constant: FixedConfig = serde_json::from_value(json!({"power": 10})).unwrap();
        assert!(!FixedStrategy::new(constant).can_calculate_standby());
    }
}
