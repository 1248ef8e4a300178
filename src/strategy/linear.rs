use crate::calibration::CalibrationTable;
use crate::entity::MonitoredEntity;
use crate::error::{PowercalcError, Result};
use crate::state::EntityState;
use crate::strategy::{CalculationContext, PowerCalculationStrategy, StrategyKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearConfig {
    #[serde(default)]
    pub min_power: Option<f64>,
    #[serde(default)]
    pub max_power: Option<f64>,
    /// Explicit breakpoints, `"value -> power"`
    #[serde(default)]
    pub calibrate: Option<Vec<String>>,
    /// Attribute to read instead of the domain default
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub gamma_curve: Option<f64>,
}

/// Where the interpolated value comes from and its natural range
#[derive(Debug, Clone, PartialEq)]
struct ValueSource {
    attribute: Option<String>,
    /// Multiplier applied to the raw value (volume_level 0..1 -> 0..100)
    scale: f64,
    min: f64,
    max: f64,
}

impl ValueSource {
    fn for_entity(source: &MonitoredEntity, attribute: Option<&str>) -> Result<Self> {
        let percentage = |attribute: Option<&str>, scale: f64| ValueSource {
            attribute: attribute.map(str::to_string),
            scale,
            min: 1.0,
            max: 100.0,
        };

        if let Some(attribute) = attribute {
            if attribute == "brightness" {
                return Ok(ValueSource {
                    attribute: Some(attribute.to_string()),
                    scale: 1.0,
                    min: 1.0,
                    max: 255.0,
                });
            }
            return Ok(percentage(Some(attribute), 1.0));
        }

        match source.domain.as_str() {
            "light" => Ok(ValueSource {
                attribute: Some("brightness".to_string()),
                scale: 1.0,
                min: 1.0,
                max: 255.0,
            }),
            "fan" => Ok(percentage(Some("percentage"), 1.0)),
            "media_player" => Ok(percentage(Some("volume_level"), 100.0)),
            "sensor" | "input_number" | "number" => Ok(percentage(None, 1.0)),
            other => Err(PowercalcError::StrategyConfiguration(format!(
                "linear strategy does not support the {} domain without an 'attribute'",
                other
            ))),
        }
    }

    fn read(&self, state: &EntityState) -> Option<f64> {
        let raw = match &self.attribute {
            Some(attribute) => state.attribute_f64(attribute),
            None => state.numeric_state(),
        }?;
        Some(raw * self.scale)
    }
}

/// Interpolates power along calibration breakpoints
pub struct LinearStrategy {
    table: CalibrationTable,
    value_source: ValueSource,
}

impl LinearStrategy {
    pub fn new(config: LinearConfig, source: &MonitoredEntity) -> Result<Self> {
        let value_source = ValueSource::for_entity(source, config.attribute.as_deref())?;

        let table = match (&config.calibrate, config.min_power, config.max_power) {
            (Some(entries), _, _) if !entries.is_empty() => CalibrationTable::parse(entries)?,
            (_, Some(min_power), Some(max_power)) => {
                if max_power < min_power {
                    return Err(PowercalcError::StrategyConfiguration(format!(
                        "max_power {} is lower than min_power {}",
                        max_power, min_power
                    )));
                }
                CalibrationTable::from_range(
                    value_source.min,
                    value_source.max,
                    min_power,
                    max_power,
                    config.gamma_curve.unwrap_or(1.0),
                )?
            }
            _ => {
                return Err(PowercalcError::StrategyConfiguration(
                    "linear strategy needs 'min_power' and 'max_power' or a 'calibrate' list"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            table,
            value_source,
        })
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.table
    }
}

impl PowerCalculationStrategy for LinearStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Linear
    }

    fn calculate(&mut self, state: &EntityState, _ctx: &CalculationContext<'_>) -> Option<f64> {
        let Some(value) = self.value_source.read(state) else {
            debug!(
                entity_id = %state.entity_id,
                attribute = ?self.value_source.attribute,
                "No numeric value to interpolate"
            );
            return None;
        };
        Some(self.table.interpolate(value))
    }

    fn validate(&self, source: &MonitoredEntity) -> Result<()> {
        ValueSource::for_entity(source, self.value_source.attribute.as_deref()).map(|_| ())
    }
}
