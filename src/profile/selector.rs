use crate::entity::MonitoredEntity;
use crate::error::{PowercalcError, Result};
use crate::profile::SubProfileSelectConfig;
use crate::state::{EntityState, StateReader};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Placeholder in entity_state matchers replaced by the monitored entity's object id
const SOURCE_OBJECT_PLACEHOLDER: &str = "{{source_object}}";

/// One link in the sub-profile matcher chain
pub trait SubProfileMatcher: Send + Sync {
    /// Sub-profile id for the current state, `None` when this matcher does not apply
    fn match_state(
        &self,
        state: &EntityState,
        source: &MonitoredEntity,
        states: &dyn StateReader,
    ) -> Option<String>;

    /// Extra entity ids whose changes must trigger a recalculation
    fn tracking_references(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Deserialize)]
struct AttributeMatcher {
    attribute: String,
    map: HashMap<String, String>,
}

impl SubProfileMatcher for AttributeMatcher {
    fn match_state(
        &self,
        state: &EntityState,
        _source: &MonitoredEntity,
        _states: &dyn StateReader,
    ) -> Option<String> {
        let value = state.attribute_string(&self.attribute)?;
        self.map.get(&value).cloned()
    }
}

#[derive(Deserialize)]
struct EntityStateMatcher {
    entity_id: String,
    map: HashMap<String, String>,
}

impl SubProfileMatcher for EntityStateMatcher {
    fn match_state(
        &self,
        state: &EntityState,
        _source: &MonitoredEntity,
        states: &dyn StateReader,
    ) -> Option<String> {
        let tracked = if state.entity_id == self.entity_id {
            Some(state.clone())
        } else {
            states.get_state(&self.entity_id)
        }?;
        self.map.get(&tracked.state).cloned()
    }

    fn tracking_references(&self) -> Vec<String> {
        vec![self.entity_id.clone()]
    }
}

struct EntityIdMatcher {
    pattern: Regex,
    profile: String,
}

#[derive(Deserialize)]
struct EntityIdDescriptor {
    pattern: String,
    profile: String,
}

impl SubProfileMatcher for EntityIdMatcher {
    fn match_state(
        &self,
        _state: &EntityState,
        source: &MonitoredEntity,
        _states: &dyn StateReader,
    ) -> Option<String> {
        self.pattern
            .is_match(&source.entity_id)
            .then(|| self.profile.clone())
    }
}

#[derive(Deserialize)]
struct IntegrationMatcher {
    integration: String,
    profile: String,
}

impl SubProfileMatcher for IntegrationMatcher {
    fn match_state(
        &self,
        _state: &EntityState,
        source: &MonitoredEntity,
        _states: &dyn StateReader,
    ) -> Option<String> {
        (source.platform.as_deref() == Some(self.integration.as_str()))
            .then(|| self.profile.clone())
    }
}

#[derive(Deserialize)]
struct ModelIdMatcher {
    model_id: String,
    profile: String,
}

impl SubProfileMatcher for ModelIdMatcher {
    fn match_state(
        &self,
        _state: &EntityState,
        source: &MonitoredEntity,
        _states: &dyn StateReader,
    ) -> Option<String> {
        let model_id = source.device.as_ref()?.model_id.as_deref()?;
        (model_id == self.model_id).then(|| self.profile.clone())
    }
}

/// Picks a sub-profile from live state; always resolves to one
pub struct SubProfileSelector {
    matchers: Vec<Box<dyn SubProfileMatcher>>,
    default: String,
}

impl SubProfileSelector {
    /// Build the matcher chain. Unknown matcher kinds are a configuration error.
    pub fn new(config: &SubProfileSelectConfig, source: &MonitoredEntity) -> Result<Self> {
        let matchers = config
            .matchers
            .iter()
            .map(|descriptor| build_matcher(descriptor, source))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            matchers,
            default: config.default.clone(),
        })
    }

    pub fn select_sub_profile(
        &self,
        state: &EntityState,
        source: &MonitoredEntity,
        states: &dyn StateReader,
    ) -> String {
        self.matchers
            .iter()
            .find_map(|matcher| matcher.match_state(state, source, states))
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn tracking_references(&self) -> Vec<String> {
        self.matchers
            .iter()
            .flat_map(|matcher| matcher.tracking_references())
            .collect()
    }
}

fn build_matcher(descriptor: &Value, source: &MonitoredEntity) -> Result<Box<dyn SubProfileMatcher>> {
    let kind = descriptor
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            PowercalcError::SensorConfiguration("sub profile matcher without 'type'".to_string())
        })?;

    let invalid = |e: serde_json::Error| {
        PowercalcError::SensorConfiguration(format!("invalid '{}' matcher: {}", kind, e))
    };

    let matcher: Box<dyn SubProfileMatcher> = match kind {
        "attribute" => Box::new(
            serde_json::from_value::<AttributeMatcher>(descriptor.clone()).map_err(invalid)?,
        ),
        "entity_state" => {
            let mut matcher =
                serde_json::from_value::<EntityStateMatcher>(descriptor.clone()).map_err(invalid)?;
            matcher.entity_id = matcher
                .entity_id
                .replace(SOURCE_OBJECT_PLACEHOLDER, &source.object_id);
            Box::new(matcher)
        }
        "entity_id" => {
            let desc =
                serde_json::from_value::<EntityIdDescriptor>(descriptor.clone()).map_err(invalid)?;
            let pattern = Regex::new(&desc.pattern).map_err(|e| {
                PowercalcError::SensorConfiguration(format!(
                    "invalid entity_id pattern '{}': {}",
                    desc.pattern, e
                ))
            })?;
            Box::new(EntityIdMatcher {
                pattern,
                profile: desc.profile,
            })
        }
        "integration" => Box::new(
            serde_json::from_value::<IntegrationMatcher>(descriptor.clone()).map_err(invalid)?,
        ),
        "model_id" => Box::new(
            serde_json::from_value::<ModelIdMatcher>(descriptor.clone()).map_err(invalid)?,
        ),
        other => {
            return Err(PowercalcError::SensorConfiguration(format!(
                "unknown sub profile matcher type '{}'",
                other
            )))
        }
    };

    Ok(matcher)
}
