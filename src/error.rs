use thiserror::Error;

/// Configuration-time errors raised while building strategies, sensors and groups.
///
/// A failure aborts creation of the single sensor being configured; runtime
/// calculation problems are never reported through this type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PowercalcError {
    /// A strategy is missing required parameters or has contradictory ones
    #[error("strategy configuration error: {0}")]
    StrategyConfiguration(String),

    /// The requested strategy is not implemented
    #[error("unsupported strategy: {0}")]
    UnsupportedStrategy(String),

    /// The strategy or operation does not apply to this entity
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    /// No table resolves for the entity's color modes, or a sub-profile is unknown
    #[error("model not supported: {0}")]
    ModelNotSupported(String),

    /// The LUT registry has no table for this profile and color mode
    #[error("no lookup table for {manufacturer} {model} ({color_mode})")]
    LutFileNotFound {
        manufacturer: String,
        model: String,
        color_mode: String,
    },

    /// Group or sensor configuration is invalid
    #[error("sensor configuration error: {0}")]
    SensorConfiguration(String),
}

pub type Result<T> = std::result::Result<T, PowercalcError>;
