use crate::error::{PowercalcError, Result};
use crate::state::{EntityState, StateReader};
use crate::template::Template;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One accepted state or a list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateMatch {
    One(String),
    Many(Vec<String>),
}

impl StateMatch {
    fn contains(&self, value: &str) -> bool {
        match self {
            StateMatch::One(s) => s == value,
            StateMatch::Many(list) => list.iter().any(|s| s == value),
        }
    }
}

/// Boolean condition over entity states.
///
/// Conditions without an `entity_id` are evaluated against the source entity's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Condition {
    State {
        #[serde(default)]
        entity_id: Option<String>,
        #[serde(default)]
        attribute: Option<String>,
        state: StateMatch,
    },
    NumericState {
        #[serde(default)]
        entity_id: Option<String>,
        #[serde(default)]
        attribute: Option<String>,
        #[serde(default)]
        above: Option<f64>,
        #[serde(default)]
        below: Option<f64>,
    },
    And {
        conditions: Vec<Condition>,
    },
    Or {
        conditions: Vec<Condition>,
    },
    /// True when none of the nested conditions hold
    Not {
        conditions: Vec<Condition>,
    },
    Template {
        value_template: Template,
    },
}

impl Condition {
    pub fn validate(&self) -> Result<()> {
        match self {
            Condition::NumericState { above: None, below: None, .. } => {
                Err(PowercalcError::StrategyConfiguration(
                    "numeric_state condition needs 'above' or 'below'".to_string(),
                ))
            }
            Condition::And { conditions }
            | Condition::Or { conditions }
            | Condition::Not { conditions } => {
                conditions.iter().try_for_each(Condition::validate)
            }
            _ => Ok(()),
        }
    }

    pub fn evaluate(&self, source_state: &EntityState, states: &dyn StateReader) -> bool {
        match self {
            Condition::State {
                entity_id,
                attribute,
                state,
            } => {
                let Some(target) = resolve(entity_id, source_state, states) else {
                    return false;
                };
                let value = match attribute {
                    Some(attribute) => match target.attribute_string(attribute) {
                        Some(v) => v,
                        None => return false,
                    },
                    None => target.state,
                };
                state.contains(&value)
            }
            Condition::NumericState {
                entity_id,
                attribute,
                above,
                below,
            } => {
                let Some(target) = resolve(entity_id, source_state, states) else {
                    return false;
                };
                let value = match attribute {
                    Some(attribute) => target.attribute_f64(attribute),
                    None => target.numeric_state(),
                };
                let Some(value) = value else {
                    return false;
                };
                above.map_or(true, |a| value > a) && below.map_or(true, |b| value < b)
            }
            Condition::And { conditions } => {
                conditions.iter().all(|c| c.evaluate(source_state, states))
            }
            Condition::Or { conditions } => {
                conditions.iter().any(|c| c.evaluate(source_state, states))
            }
            Condition::Not { conditions } => {
                !conditions.iter().any(|c| c.evaluate(source_state, states))
            }
            Condition::Template { value_template } => match value_template.render(states) {
                Ok(rendered) => is_truthy(&rendered),
                Err(e) => {
                    debug!(template = %value_template.source(), error = %e, "Condition template failed");
                    false
                }
            },
        }
    }

    /// Entity ids this condition reads besides the source entity
    pub fn referenced_entities(&self) -> Vec<String> {
        match self {
            Condition::State { entity_id, .. } | Condition::NumericState { entity_id, .. } => {
                entity_id.iter().cloned().collect()
            }
            Condition::And { conditions }
            | Condition::Or { conditions }
            | Condition::Not { conditions } => conditions
                .iter()
                .flat_map(Condition::referenced_entities)
                .collect(),
            Condition::Template { value_template } => value_template.referenced_entities(),
        }
    }
}

fn resolve(
    entity_id: &Option<String>,
    source_state: &EntityState,
    states: &dyn StateReader,
) -> Option<EntityState> {
    match entity_id {
        None => Some(source_state.clone()),
        Some(id) if *id == source_state.entity_id => Some(source_state.clone()),
        Some(id) => states.get_state(id),
    }
}

fn is_truthy(rendered: &str) -> bool {
    let rendered = rendered.trim();
    match rendered.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => true,
        "false" | "off" | "no" | "" => false,
        _ => rendered.parse::<f64>().map(|v| v != 0.0).unwrap_or(false),
    }
}
