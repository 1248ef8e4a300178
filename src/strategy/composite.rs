use crate::condition::Condition;
use crate::entity::MonitoredEntity;
use crate::error::{PowercalcError, Result};
use crate::scheduler::TimerFired;
use crate::state::EntityState;
use crate::strategy::{
    CalculationContext, PlaybookStrategy, PowerCalculationStrategy, StrategyConfig, StrategyKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeEntry {
    /// No condition always matches
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(flatten)]
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeConfig {
    pub strategies: Vec<CompositeEntry>,
}

/// Dispatches to the first sub-strategy whose condition holds
pub struct CompositeStrategy {
    entries: Vec<(Option<Condition>, Box<dyn PowerCalculationStrategy>)>,
}

impl CompositeStrategy {
    pub fn new(entries: Vec<(Option<Condition>, Box<dyn PowerCalculationStrategy>)>) -> Self {
        Self { entries }
    }
}

impl PowerCalculationStrategy for CompositeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Composite
    }

    fn calculate(&mut self, state: &EntityState, ctx: &CalculationContext<'_>) -> Option<f64> {
        for (idx, (condition, strategy)) in self.entries.iter_mut().enumerate() {
            let matched = condition
                .as_ref()
                .map_or(true, |condition| condition.evaluate(state, ctx.states));
            if matched {
                debug!(entity_id = %state.entity_id, entry = idx, strategy = %strategy.kind(), "Composite entry matched");
                return strategy.calculate(state, ctx);
            }
        }
        debug!(entity_id = %state.entity_id, "No composite condition matched");
        None
    }

    fn validate(&self, source: &MonitoredEntity) -> Result<()> {
        if self.entries.is_empty() {
            return Err(PowercalcError::StrategyConfiguration(
                "composite strategy needs at least one sub strategy".to_string(),
            ));
        }
        for (condition, strategy) in &self.entries {
            if let Some(condition) = condition {
                condition.validate()?;
            }
            strategy.validate(source)?;
        }
        // Only one playbook can own the entity's timer
        if self.playbook_count() > 1 {
            return Err(PowercalcError::StrategyConfiguration(
                "composite strategy may contain at most one playbook".to_string(),
            ));
        }
        Ok(())
    }

    fn tracked_references(&self) -> Vec<String> {
        let mut references: Vec<String> = Vec::new();
        for (condition, strategy) in &self.entries {
            let from_condition = condition.iter().flat_map(Condition::referenced_entities);
            for reference in from_condition.chain(strategy.tracked_references()) {
                if !references.contains(&reference) {
                    references.push(reference);
                }
            }
        }
        references
    }

    fn can_calculate_standby(&self) -> bool {
        self.entries.iter().any(|(_, strategy)| strategy.can_calculate_standby())
    }

    fn on_timer(&mut self, timer: &TimerFired, ctx: &CalculationContext<'_>) -> Option<f64> {
        self.entries
            .iter_mut()
            .filter_map(|(_, strategy)| strategy.on_timer(timer, ctx))
            .last()
    }

    fn playbook_mut(&mut self) -> Option<&mut PlaybookStrategy> {
        self.entries
            .iter_mut()
            .find_map(|(_, strategy)| strategy.playbook_mut())
    }

    fn playbook_count(&self) -> usize {
        self.entries.iter().map(|(_, strategy)| strategy.playbook_count()).sum()
    }
}
