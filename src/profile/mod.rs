use crate::error::{PowercalcError, Result};
use crate::strategy::{CompositeConfig, FixedConfig, LinearConfig, PlaybookConfig, StrategyKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

mod selector;

pub use selector::{SubProfileMatcher, SubProfileSelector};


/// Matcher chain plus the catch-all sub-profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubProfileSelectConfig {
    /// Raw matcher descriptors, each with a "type" key
    #[serde(default)]
    pub matchers: Vec<Value>,
    /// Sub-profile used when no matcher fires
    pub default: String,
}

/// A user-supplied variable referenced as `[[name]]` inside profile data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDeclaration {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Power profile as delivered by the profile loader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDefinition {
    pub manufacturer: String,
    pub model: String,
    #[serde(default)]
    pub name: Option<String>,
    pub calculation_strategy: StrategyKind,
    /// Sub-profile directory: id -> data overrides
    #[serde(default)]
    pub sub_profiles: BTreeMap<String, Value>,
    /// Initially selected sub-profile
    #[serde(default)]
    pub sub_profile: Option<String>,
    #[serde(default)]
    pub sub_profile_select: Option<SubProfileSelectConfig>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDeclaration>,
    /// Everything else: standby_power, linear_config, fixed_config, ...
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// A device model's power characteristics.
///
/// Constructed once when the model is resolved; selecting a sub-profile merges
/// its overrides on top of the base data (never on top of another sub-profile).
#[derive(Debug, Clone)]
pub struct PowerProfile {
    manufacturer: String,
    model: String,
    name: Option<String>,
    strategy: StrategyKind,
    sub_profiles: BTreeMap<String, Value>,
    sub_profile_select: Option<SubProfileSelectConfig>,
    fields: BTreeMap<String, FieldDeclaration>,
    base: Value,
    merged: Value,
    selected: Option<String>,
}

impl PowerProfile {
    pub fn new(definition: ProfileDefinition) -> Result<Self> {
        let base = Value::Object(definition.data);
        let mut profile = Self {
            manufacturer: definition.manufacturer,
            model: definition.model,
            name: definition.name,
            strategy: definition.calculation_strategy,
            sub_profiles: definition.sub_profiles,
            sub_profile_select: definition.sub_profile_select,
            fields: definition.fields,
            merged: base.clone(),
            base,
            selected: None,
        };

        if let Some(select) = &profile.sub_profile_select {
            if !profile.sub_profiles.contains_key(&select.default) {
                return Err(PowercalcError::ModelNotSupported(format!(
                    "default sub profile '{}' does not exist for {} {}",
                    select.default, profile.manufacturer, profile.model
                )));
            }
        }

        if let Some(initial) = definition.sub_profile {
            profile.select_sub_profile(&initial)?;
        }

        Ok(profile)
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.model)
    }

    pub fn calculation_strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn sub_profile(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn sub_profile_ids(&self) -> impl Iterator<Item = &str> {
        self.sub_profiles.keys().map(String::as_str)
    }

    pub fn sub_profile_select(&self) -> Option<&SubProfileSelectConfig> {
        self.sub_profile_select.as_ref()
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldDeclaration> {
        &self.fields
    }

    /// Merge a sub-profile's overrides into the profile data
    pub fn select_sub_profile(&mut self, id: &str) -> Result<()> {
        let overrides = self.sub_profiles.get(id).ok_or_else(|| {
            PowercalcError::ModelNotSupported(format!(
                "sub profile '{}' does not exist for {} {}",
                id, self.manufacturer, self.model
            ))
        })?;

        let mut merged = self.base.clone();
        merge_json(&mut merged, overrides);
        self.merged = merged;
        self.selected = Some(id.to_string());

        info!(
            manufacturer = %self.manufacturer,
            model = %self.model,
            sub_profile = %id,
            "Selected sub profile"
        );
        Ok(())
    }

    /// Substitute `[[field]]` placeholders with user values or declared defaults
    pub fn apply_custom_fields(&mut self, values: &HashMap<String, Value>) -> Result<()> {
        let mut resolved = HashMap::new();
        for (name, declaration) in &self.fields {
            let value = values
                .get(name)
                .or(declaration.default.as_ref())
                .ok_or_else(|| {
                    PowercalcError::SensorConfiguration(format!(
                        "custom field '{}' has no value and no default",
                        name
                    ))
                })?;
            resolved.insert(name.clone(), value.clone());
        }

        substitute_fields(&mut self.base, &resolved);
        for overrides in self.sub_profiles.values_mut() {
            substitute_fields(overrides, &resolved);
        }
        self.merged = self.base.clone();
        if let Some(selected) = self.selected.clone() {
            self.select_sub_profile(&selected)?;
        }
        Ok(())
    }

    pub fn standby_power(&self) -> f64 {
        self.merged
            .get("standby_power")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn standby_power_on(&self) -> f64 {
        self.merged
            .get("standby_power_on")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn linear_config(&self) -> Result<Option<LinearConfig>> {
        self.section("linear_config")
    }

    pub fn fixed_config(&self) -> Result<Option<FixedConfig>> {
        self.section("fixed_config")
    }

    pub fn playbook_config(&self) -> Result<Option<PlaybookConfig>> {
        self.section("playbook_config")
    }

    pub fn composite_config(&self) -> Result<Option<CompositeConfig>> {
        self.section("composite_config")
    }

    fn section<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.merged.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                PowercalcError::StrategyConfiguration(format!(
                    "invalid {} in profile {} {}: {}",
                    key, self.manufacturer, self.model, e
                ))
            }),
        }
    }
}

/// Recursively merge `overrides` into `target`; objects merge, everything else replaces
fn merge_json(target: &mut Value, overrides: &Value) {
    match (target, overrides) {
        (Value::Object(target), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overrides) => *target = overrides.clone(),
    }
}

fn substitute_fields(value: &mut Value, fields: &HashMap<String, Value>) {
    if let Value::String(s) = value {
        // A bare placeholder keeps the field's JSON type
        let whole = fields
            .iter()
            .find(|(name, _)| s.trim() == format!("[[{}]]", name))
            .map(|(_, replacement)| replacement.clone());
        if let Some(replacement) = whole {
            *value = replacement;
            return;
        }
    }

    match value {
        Value::String(s) => {
            for (name, replacement) in fields {
                let placeholder = format!("[[{}]]", name);
                if s.contains(&placeholder) {
                    *s = s.replace(&placeholder, &crate::state::value_to_string(replacement));
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_fields(v, fields)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_fields(v, fields)),
        _ => {}
    }
}
