use crate::entity::{ColorMode, MonitoredEntity};
use crate::error::{PowercalcError, Result};
use crate::lut::{normalize_hue, normalize_saturation, LightSetting, LutMode, LutRegistry, MAX_BRIGHTNESS};
use crate::profile::PowerProfile;
use crate::state::EntityState;
use crate::strategy::{CalculationContext, PowerCalculationStrategy, StrategyKind};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Looks up measured power for lights from the profile's tables
pub struct LutStrategy {
    profile: PowerProfile,
    registry: Arc<LutRegistry>,
}

impl LutStrategy {
    pub fn new(profile: PowerProfile, registry: Arc<LutRegistry>) -> Self {
        Self { profile, registry }
    }

    fn color_mode(state: &EntityState, source: &MonitoredEntity) -> ColorMode {
        if let Some(mode) = state.attribute_string("color_mode") {
            return ColorMode::parse(&mode);
        }
        source
            .supported_color_modes
            .first()
            .copied()
            .unwrap_or(ColorMode::Brightness)
    }

    fn light_setting(state: &EntityState, color_mode: ColorMode, mode: LutMode) -> Option<LightSetting> {
        let brightness = if color_mode == ColorMode::Onoff {
            MAX_BRIGHTNESS
        } else {
            state.attribute_f64("brightness")?.round().max(0.0) as u32
        };

        let mut setting = LightSetting {
            mode,
            brightness,
            color_temp: None,
            hue: None,
            saturation: None,
        };

        match mode {
            LutMode::Brightness => {}
            LutMode::ColorTemp => {
                let mired = match state.attribute_f64("color_temp") {
                    Some(mired) => mired,
                    None => {
                        let kelvin = state.attribute_f64("color_temp_kelvin").filter(|k| *k > 0.0)?;
                        1_000_000.0 / kelvin
                    }
                };
                setting.color_temp = Some(mired.round().max(0.0) as u32);
            }
            LutMode::Hs => {
                let Some(Value::Array(hs)) = state.attribute("hs_color") else {
                    return None;
                };
                let hue = hs.first()?.as_f64()?;
                let saturation = hs.get(1)?.as_f64()?;
                setting.hue = Some(normalize_hue(hue));
                setting.saturation = Some(normalize_saturation(saturation));
            }
        }

        Some(setting)
    }
}

impl PowerCalculationStrategy for LutStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Lut
    }

    fn calculate(&mut self, state: &EntityState, ctx: &CalculationContext<'_>) -> Option<f64> {
        let color_mode = Self::color_mode(state, ctx.source);
        let Some(mode) = LutMode::for_color_mode(color_mode) else {
            warn!(entity_id = %state.entity_id, ?color_mode, "Color mode has no lookup table layout");
            return None;
        };

        let table = match self.registry.get_table(&self.profile, mode) {
            Ok(table) => table,
            Err(e) => {
                warn!(entity_id = %state.entity_id, error = %e, "Lookup table unavailable");
                return None;
            }
        };

        let Some(setting) = Self::light_setting(state, color_mode, mode) else {
            debug!(entity_id = %state.entity_id, mode = %mode, "Light attributes incomplete for lookup");
            return None;
        };

        table.lookup(&setting)
    }

    fn validate(&self, source: &MonitoredEntity) -> Result<()> {
        if source.domain != "light" {
            return Err(PowercalcError::UnsupportedMode(format!(
                "lut strategy only supports lights, not {}",
                source.entity_id
            )));
        }

        if source.supported_color_modes.is_empty() {
            let any = [LutMode::Brightness, LutMode::ColorTemp, LutMode::Hs]
                .into_iter()
                .any(|mode| self.registry.get_table(&self.profile, mode).is_ok());
            if !any {
                return Err(PowercalcError::ModelNotSupported(format!(
                    "no lookup tables for {} {}",
                    self.profile.manufacturer(),
                    self.profile.model()
                )));
            }
            return Ok(());
        }

        for color_mode in &source.supported_color_modes {
            let mode = LutMode::for_color_mode(*color_mode).ok_or_else(|| {
                PowercalcError::ModelNotSupported(format!(
                    "color mode {:?} of {} cannot be looked up",
                    color_mode, source.entity_id
                ))
            })?;
            self.registry.get_table(&self.profile, mode).map_err(|e| {
                PowercalcError::ModelNotSupported(format!(
                    "{} does not support {:?}: {}",
                    self.profile.model(),
                    color_mode,
                    e
                ))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lut::{LutKey, LutPayload, LutRow, StaticLutSource};
    use crate::profile::ProfileDefinition;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn profile() -> PowerProfile {
        let definition: ProfileDefinition = serde_json::from_value(json!({
            "manufacturer": "signify",
            "model": "LCT010",
            "calculation_strategy": "lut",
            "standby_power": 0.4
        }))
        .unwrap();
        PowerProfile::new(definition).unwrap()
    }

    fn registry() -> Arc<LutRegistry> {
        let source = StaticLutSource::new()
            .with(
                LutKey::new("signify", "LCT010", None, LutMode::Brightness),
                LutPayload::Rows(vec![
                    LutRow::brightness(1, 0.6),
                    LutRow::brightness(128, 3.0),
                    LutRow::brightness(255, 6.0),
                ]),
            )
            .with(
                LutKey::new("signify", "LCT010", None, LutMode::ColorTemp),
                LutPayload::Rows(vec![
                    LutRow::color_temp(255, 153, 7.0),
                    LutRow::color_temp(255, 454, 5.0),
                ]),
            );
        Arc::new(LutRegistry::new(Arc::new(source)))
    }

    fn calculate(strategy: &mut LutStrategy, source: &MonitoredEntity, state: &EntityState) -> Option<f64> {
        let states = HashMap::new();
        let ctx = CalculationContext {
            source,
            states: &states,
            now: Utc::now(),
        };
        strategy.calculate(state, &ctx)
    }

    #[test]
    fn test_brightness_mode() {
        let source = MonitoredEntity::from_entity_id("light.hall").unwrap();
        let mut strategy = LutStrategy::new(profile(), registry());

        let state = EntityState::new("light.hall", "on")
            .with_attribute("color_mode", json!("brightness"))
            .with_attribute("brightness", json!(128));
        assert_eq!(calculate(&mut strategy, &source, &state), Some(3.0));
    }

    #[test]
    fn test_onoff_uses_full_brightness() {
        let source = MonitoredEntity::from_entity_id("light.hall").unwrap();
        let mut strategy = LutStrategy::new(profile(), registry());

        let state = EntityState::new("light.hall", "on").with_attribute("color_mode", json!("onoff"));
        assert_eq!(calculate(&mut strategy, &source, &state), Some(6.0));
    }

    #[test]
    fn test_color_temp_from_kelvin() {
        let source = MonitoredEntity::from_entity_id("light.hall").unwrap();
        let mut strategy = LutStrategy::new(profile(), registry());

        let state = EntityState::new("light.hall", "on")
            .with_attribute("color_mode", json!("color_temp"))
            .with_attribute("brightness", json!(255))
            .with_attribute("color_temp_kelvin", json!(2500));
        assert_eq!(calculate(&mut strategy, &source, &state), Some(5.0));
    }

    #[test]
    fn test_missing_table_gives_none() {
        let source = MonitoredEntity::from_entity_id("light.hall").unwrap();
        let mut strategy = LutStrategy::new(profile(), registry());

        let state = EntityState::new("light.hall", "on")
            .with_attribute("color_mode", json!("hs"))
            .with_attribute("brightness", json!(255))
            .with_attribute("hs_color", json!([30.0, 80.0]));
        assert_eq!(calculate(&mut strategy, &source, &state), None);
    }

    #[test]
    fn test_validate_against_color_modes() {
        let strategy = LutStrategy::new(profile(), registry());

        let supported = MonitoredEntity::from_entity_id("light.hall")
            .unwrap()
            .with_color_modes(vec![ColorMode::ColorTemp]);
        assert!(strategy.validate(&supported).is_ok());

        let unsupported = MonitoredEntity::from_entity_id("light.hall")
            .unwrap()
            .with_color_modes(vec![ColorMode::ColorTemp, ColorMode::Xy]);
        assert!(matches!(
            strategy.validate(&unsupported),
            Err(PowercalcError::ModelNotSupported(_))
        ));

        let switch = MonitoredEntity::from_entity_id("switch.hall").unwrap();
        assert!(matches!(
            strategy.validate(&switch),
            Err(PowercalcError::UnsupportedMode(_))
        ));
    }
}
