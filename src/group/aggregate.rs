use crate::sensor::{read_value, SensorKind};
use crate::state::StateReader;
use crate::store::{member_key, PreviousStateStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current value of one member in the group's unit, `None` when missing or unavailable
pub fn member_value(states: &dyn StateReader, member: &str, kind: SensorKind, unit: &str) -> Option<f64> {
    states
        .get_state(member)
        .and_then(|state| read_value(&state, kind, unit))
}

/// Sum of member values.
///
/// Unavailable members are left out, or count as zero with `ignore_unavailable`.
/// `None` when no member contributes and unavailable members are not ignored.
pub fn sum_members(
    states: &dyn StateReader,
    members: &[String],
    kind: SensorKind,
    unit: &str,
    ignore_unavailable: bool,
) -> Option<f64> {
    let values: Vec<f64> = members
        .iter()
        .filter_map(|member| member_value(states, member, kind, unit))
        .collect();

    if values.is_empty() && !ignore_unavailable {
        return None;
    }
    Some(values.iter().sum())
}

/// `base - Σ subtract`; unavailable subtractors are skipped, an unavailable base is `None`
pub fn subtract_values(base: Option<f64>, subtract: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let base = base?;
    Some(subtract.into_iter().flatten().fold(base, |acc, value| acc - value))
}

/// Result of feeding one member value into an energy group
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaOutcome {
    /// Added to the total (zero for repeated values)
    Accrued(f64),
    /// Negative, likely a member counter reset; not subtracted
    Discarded(f64),
}

/// Delta accounting for an energy group.
///
/// Each member's last raw value lives in the previous-state store under
/// `"{group}::{member}"`; the running total under the group id.
pub struct GroupEnergyAggregator {
    group_id: String,
    start_at_zero: bool,
    total: f64,
    store: Arc<PreviousStateStore>,
}

impl GroupEnergyAggregator {
    pub fn new(group_id: &str, start_at_zero: bool, store: Arc<PreviousStateStore>) -> Self {
        let total = store.get(group_id).map(|stored| stored.value).unwrap_or(0.0);
        if total > 0.0 {
            info!(group_id = %group_id, total, "Restored group energy total");
        }

        Self {
            group_id: group_id.to_string(),
            start_at_zero,
            total,
            store,
        }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn update_member(&mut self, member: &str, value: f64, timestamp: DateTime<Utc>) -> DeltaOutcome {
        let key = member_key(&self.group_id, member);

        let delta = match self.store.get(&key) {
            Some(previous) => value - previous.value,
            None if self.start_at_zero => 0.0,
            None => value,
        };

        self.store.set(&key, value, timestamp);

        if delta < 0.0 {
            warn!(
                group_id = %self.group_id,
                member = %member,
                delta,
                "Negative energy delta discarded"
            );
            return DeltaOutcome::Discarded(delta);
        }

        if delta > 0.0 {
            self.total += delta;
            self.store.set(&self.group_id, self.total, timestamp);
        }
        debug!(group_id = %self.group_id, member = %member, delta, total = self.total, "Energy delta accrued");
        DeltaOutcome::Accrued(delta)
    }

    /// Zero the total and forget every member's previous value
    pub fn reset(&mut self, timestamp: DateTime<Utc>) {
        let cleared = self.store.clear_group(&self.group_id);
        self.total = 0.0;
        self.store.set(&self.group_id, 0.0, timestamp);
        info!(group_id = %self.group_id, cleared, "Group energy reset");
    }

    /// Set the total without touching members
    pub fn calibrate(&mut self, value: f64, timestamp: DateTime<Utc>) {
        self.total = value;
        self.store.set(&self.group_id, value, timestamp);
        info!(group_id = %self.group_id, value, "Group energy calibrated");
    }
}
