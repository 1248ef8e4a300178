// Power calculation strategies

use crate::entity::MonitoredEntity;
use crate::error::{PowercalcError, Result};
use crate::lut::LutRegistry;
use crate::profile::PowerProfile;
use crate::scheduler::{Scheduler, TimerFired};
use crate::state::{EntityState, StateReader};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod composite;
mod fixed;
mod linear;
mod lut;
mod playbook;

pub use composite::{CompositeConfig, CompositeEntry, CompositeStrategy};
pub use fixed::{FixedConfig, FixedStrategy, PowerValue};
pub use linear::{LinearConfig, LinearStrategy};
pub use lut::LutStrategy;
pub use playbook::{
    parse_playbook_csv, CsvPlaybookLoader, PlaybookConfig, PlaybookEntry, PlaybookLoader,
    PlaybookStrategy,
};

/// Everything a strategy may read while calculating
pub struct CalculationContext<'a> {
    pub source: &'a MonitoredEntity,
    pub states: &'a dyn StateReader,
    pub now: DateTime<Utc>,
}

/// Converts the monitored entity's current state into an estimated power in watts
pub trait PowerCalculationStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// `None` means no power could be determined; the sensor becomes unavailable
    fn calculate(&mut self, state: &EntityState, ctx: &CalculationContext<'_>) -> Option<f64>;

    /// Check this strategy can serve the entity
    fn validate(&self, source: &MonitoredEntity) -> Result<()>;

    /// Entity ids whose changes must trigger a recalculation
    fn tracked_references(&self) -> Vec<String> {
        Vec::new()
    }

    /// True when the strategy produces its own value for off states
    fn can_calculate_standby(&self) -> bool {
        false
    }

    /// Handle a timer this strategy scheduled; returns a power to publish
    fn on_timer(&mut self, _timer: &TimerFired, _ctx: &CalculationContext<'_>) -> Option<f64> {
        None
    }

    fn playbook_mut(&mut self) -> Option<&mut PlaybookStrategy> {
        None
    }

    /// Playbook strategies in this strategy, nested ones included
    fn playbook_count(&self) -> usize {
        usize::from(self.kind() == StrategyKind::Playbook)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrategyKind {
    Fixed,
    Linear,
    Lut,
    Playbook,
    Composite,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Fixed => "fixed",
            StrategyKind::Linear => "linear",
            StrategyKind::Lut => "lut",
            StrategyKind::Playbook => "playbook",
            StrategyKind::Composite => "composite",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = PowercalcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(StrategyKind::Fixed),
            "linear" => Ok(StrategyKind::Linear),
            "lut" => Ok(StrategyKind::Lut),
            "playbook" => Ok(StrategyKind::Playbook),
            "composite" => Ok(StrategyKind::Composite),
            other => Err(PowercalcError::UnsupportedStrategy(other.to_string())),
        }
    }
}

impl TryFrom<String> for StrategyKind {
    type Error = PowercalcError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<StrategyKind> for String {
    fn from(kind: StrategyKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Strategy selection and its parameters; exactly one variant per sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyConfig {
    Fixed(FixedConfig),
    Linear(LinearConfig),
    /// Tables come from the sensor's power profile
    Lut,
    Playbook(PlaybookConfig),
    Composite(CompositeConfig),
}

impl StrategyConfig {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyConfig::Fixed(_) => StrategyKind::Fixed,
            StrategyConfig::Linear(_) => StrategyKind::Linear,
            StrategyConfig::Lut => StrategyKind::Lut,
            StrategyConfig::Playbook(_) => StrategyKind::Playbook,
            StrategyConfig::Composite(_) => StrategyKind::Composite,
        }
    }

    /// Strategy declared by a profile, with its parameters taken from the profile data
    pub fn from_profile(profile: &PowerProfile) -> Result<Self> {
        let missing = |section: &str| {
            PowercalcError::StrategyConfiguration(format!(
                "profile {} {} declares {} but has no {}",
                profile.manufacturer(),
                profile.model(),
                profile.calculation_strategy(),
                section
            ))
        };

        Ok(match profile.calculation_strategy() {
            StrategyKind::Fixed => StrategyConfig::Fixed(
                profile.fixed_config()?.ok_or_else(|| missing("fixed_config"))?,
            ),
            StrategyKind::Linear => StrategyConfig::Linear(
                profile.linear_config()?.ok_or_else(|| missing("linear_config"))?,
            ),
            StrategyKind::Lut => StrategyConfig::Lut,
            StrategyKind::Playbook => StrategyConfig::Playbook(
                profile.playbook_config()?.ok_or_else(|| missing("playbook_config"))?,
            ),
            StrategyKind::Composite => StrategyConfig::Composite(
                profile.composite_config()?.ok_or_else(|| missing("composite_config"))?,
            ),
        })
    }
}

/// Builds strategies from configs; holds the handles strategies share
pub struct StrategyFactory {
    lut_registry: Arc<LutRegistry>,
    scheduler: Arc<dyn Scheduler>,
    playbook_loader: Arc<dyn PlaybookLoader>,
}

impl StrategyFactory {
    pub fn new(
        lut_registry: Arc<LutRegistry>,
        scheduler: Arc<dyn Scheduler>,
        playbook_loader: Arc<dyn PlaybookLoader>,
    ) -> Self {
        Self {
            lut_registry,
            scheduler,
            playbook_loader,
        }
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Build and validate a strategy.
    ///
    /// Without an explicit config the profile's declared strategy is used.
    /// `owner` is the sensor id timers are scheduled under.
    pub fn create(
        &self,
        config: Option<&StrategyConfig>,
        source: &MonitoredEntity,
        profile: Option<&PowerProfile>,
        owner: &str,
    ) -> Result<Box<dyn PowerCalculationStrategy>> {
        let resolved;
        let config = match (config, profile) {
            (Some(config), _) => config,
            (None, Some(profile)) => {
                resolved = StrategyConfig::from_profile(profile)?;
                &resolved
            }
            (None, None) => {
                return Err(PowercalcError::StrategyConfiguration(format!(
                    "no strategy configured and no power profile for {}",
                    source.entity_id
                )))
            }
        };

        let strategy = self.build(config, source, profile, owner)?;
        strategy.validate(source)?;
        Ok(strategy)
    }

    fn build(
        &self,
        config: &StrategyConfig,
        source: &MonitoredEntity,
        profile: Option<&PowerProfile>,
        owner: &str,
    ) -> Result<Box<dyn PowerCalculationStrategy>> {
        Ok(match config {
            StrategyConfig::Fixed(c) => Box::new(FixedStrategy::new(c.clone())),
            StrategyConfig::Linear(c) => Box::new(LinearStrategy::new(c.clone(), source)?),
            StrategyConfig::Lut => {
                let profile = profile.ok_or_else(|| {
                    PowercalcError::StrategyConfiguration(
                        "lut strategy requires a power profile".to_string(),
                    )
                })?;
                Box::new(LutStrategy::new(profile.clone(), Arc::clone(&self.lut_registry)))
            }
            StrategyConfig::Playbook(c) => Box::new(PlaybookStrategy::new(
                owner,
                c.clone(),
                Arc::clone(&self.playbook_loader),
                Arc::clone(&self.scheduler),
            )?),
            StrategyConfig::Composite(c) => {
                let entries = c
                    .strategies
                    .iter()
                    .map(|entry| {
                        let sub = self.build(&entry.strategy, source, profile, owner)?;
                        Ok((entry.condition.clone(), sub))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(CompositeStrategy::new(entries))
            }
        })
    }
}
