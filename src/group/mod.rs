// Group aggregation over power and energy sensors

use crate::config::PowercalcConfig;
use crate::energy::{round_to, GatedIntegrator, ThresholdGate};
use crate::error::{PowercalcError, Result};
use crate::scheduler::{Scheduler, TimerFired, TimerId};
use crate::sensor::{SensorKind, SensorUpdate};
use crate::state::{MetricsTracker, StateReader};
use crate::store::PreviousStateStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

mod aggregate;
pub mod config;
mod throttle;

pub use aggregate::{member_value, subtract_values, sum_members, DeltaOutcome, GroupEnergyAggregator};
pub use config::{
    CatalogEntry, GroupConfig, GroupTopology, ResolvedTopology, SensorCatalog, UntrackedEnergyConfig,
};
pub use throttle::UpdateThrottle;


struct UntrackedEnergy {
    id: String,
    integrator: GatedIntegrator,
}

/// A configured group: resolved members, its aggregators and the values it last produced
pub struct Group {
    config: GroupConfig,
    topology: ResolvedTopology,
    unit: String,
    precision: Option<u32>,
    energy: Option<GroupEnergyAggregator>,
    untracked_energy: Option<UntrackedEnergy>,
    throttle: Option<UpdateThrottle>,
    pending_timer: Option<TimerId>,
    scheduler: Arc<dyn Scheduler>,
    store: Arc<PreviousStateStore>,
    outputs: BTreeMap<String, SensorUpdate>,
}

impl Group {
    pub fn new(
        config: GroupConfig,
        catalog: &SensorCatalog,
        settings: &PowercalcConfig,
        store: Arc<PreviousStateStore>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        let topology = config.resolve(catalog)?;
        let now = scheduler.now();

        let energy = match (&topology, config.kind) {
            (ResolvedTopology::Sum(_), SensorKind::Energy) => Some(GroupEnergyAggregator::new(
                &config.id,
                config.start_at_zero,
                Arc::clone(&store),
            )),
            _ => None,
        };

        let untracked_energy = match &topology {
            ResolvedTopology::TrackedUntracked {
                untracked_id: Some(untracked_id),
                untracked_energy: Some(energy_config),
                ..
            } => {
                let id = energy_config
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}_energy", untracked_id));
                let restored = store.get(&id).map(|stored| stored.value).unwrap_or(0.0);
                let gate = ThresholdGate::new(
                    energy_config.threshold,
                    Duration::from_secs(energy_config.min_dwell_seconds),
                );
                Some(UntrackedEnergy {
                    integrator: GatedIntegrator::new(gate, settings.energy.clone(), restored),
                    id,
                })
            }
            _ => None,
        };

        let interval = settings.group.energy_update_interval_seconds;
        let throttle = (config.kind == SensorKind::Energy && interval > 0).then(|| {
            UpdateThrottle::new(
                Duration::from_secs(interval),
                Duration::from_secs(settings.group.startup_window_seconds),
                now,
            )
        });

        let precision = config.precision.or(match config.kind {
            SensorKind::Power => settings.power.precision,
            SensorKind::Energy => settings.energy.precision,
        });

        info!(
            group_id = %config.id,
            kind = ?config.kind,
            members = topology.members().len(),
            "Group created"
        );

        Ok(Self {
            unit: config.unit().to_string(),
            config,
            topology,
            precision,
            energy,
            untracked_energy,
            throttle,
            pending_timer: None,
            scheduler,
            store,
            outputs: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn kind(&self) -> SensorKind {
        self.config.kind
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn topology(&self) -> &ResolvedTopology {
        &self.topology
    }

    /// Entity ids whose changes update the group
    pub fn members(&self) -> Vec<String> {
        self.topology.members()
    }

    /// Ids of every sensor this group publishes
    pub fn sensor_ids(&self) -> Vec<String> {
        let mut ids = vec![self.config.id.clone()];
        if let ResolvedTopology::TrackedUntracked {
            untracked_id: Some(untracked_id),
            ..
        } = &self.topology
        {
            ids.push(untracked_id.clone());
        }
        if let Some(untracked) = &self.untracked_energy {
            ids.push(untracked.id.clone());
        }
        ids
    }

    /// Last value produced for one of this group's sensors
    pub fn output(&self, sensor_id: &str) -> Option<&SensorUpdate> {
        self.outputs.get(sensor_id)
    }

    /// Current accumulated energy, whether or not it has been published
    pub fn energy_total(&self, sensor_id: &str) -> Option<f64> {
        if sensor_id == self.config.id {
            return self.energy.as_ref().map(|e| round_to(e.total(), self.precision));
        }
        self.untracked_energy
            .as_ref()
            .filter(|u| u.id == sensor_id)
            .map(|u| u.integrator.integrator().rounded_total())
    }

    /// Recompute after `changed` (a member, or `None` for a full refresh).
    ///
    /// Returns the updates to publish now; throttled energy groups return
    /// nothing and schedule a timer instead.
    pub fn update(
        &mut self,
        changed: Option<&str>,
        states: &dyn StateReader,
        now: DateTime<Utc>,
        metrics: &MetricsTracker,
    ) -> Vec<SensorUpdate> {
        let kind = self.config.kind;
        let mut outputs = Vec::new();

        match &self.topology {
            ResolvedTopology::Sum(members) => {
                let value = match self.energy.as_mut() {
                    Some(energy) => {
                        let changed_members: Vec<&String> = match changed {
                            Some(member) => members.iter().filter(|m| m.as_str() == member).collect(),
                            None => members.iter().collect(),
                        };
                        for member in changed_members {
                            let Some(value) = member_value(states, member, kind, &self.unit) else {
                                continue;
                            };
                            if let DeltaOutcome::Discarded(_) = energy.update_member(member, value, now) {
                                metrics.record_discarded_delta();
                            }
                        }
                        Some(energy.total())
                    }
                    None => sum_members(states, members, kind, &self.unit, self.config.ignore_unavailable),
                };
                outputs.push((self.config.id.clone(), kind, value, self.unit.clone()));
            }
            ResolvedTopology::Subtract { base, subtract } => {
                let value = subtract_values(
                    member_value(states, base, kind, &self.unit),
                    subtract.iter().map(|m| member_value(states, m, kind, &self.unit)),
                );
                outputs.push((self.config.id.clone(), kind, value, self.unit.clone()));
            }
            ResolvedTopology::TrackedUntracked {
                main,
                tracked,
                untracked_id,
                ..
            } => {
                let tracked_power = sum_members(states, tracked, kind, &self.unit, self.config.ignore_unavailable);
                outputs.push((self.config.id.clone(), kind, tracked_power, self.unit.clone()));

                if let (Some(main), Some(untracked_id)) = (main, untracked_id) {
                    let untracked =
                        subtract_values(member_value(states, main, kind, &self.unit), [tracked_power]);
                    outputs.push((untracked_id.clone(), kind, untracked, self.unit.clone()));

                    if let Some(energy) = self.untracked_energy.as_mut() {
                        // The integrator works in watts
                        let watts = untracked.map(|p| p * kind.unit_factor(&self.unit).unwrap_or(1.0));
                        let delta = energy.integrator.add_sample(now, watts);
                        let total = energy.integrator.integrator().total();
                        if delta > 0.0 {
                            self.store.set(&energy.id, total, now);
                        }
                        outputs.push((
                            energy.id.clone(),
                            SensorKind::Energy,
                            Some(energy.integrator.integrator().rounded_total()),
                            energy.integrator.integrator().unit(),
                        ));
                    }
                }
            }
        }

        for (sensor_id, kind, value, unit) in outputs {
            let precision = match kind {
                k if k == self.config.kind => self.precision,
                _ => None,
            };
            let update = SensorUpdate {
                value: value.map(|v| round_to(v, precision)),
                sensor_id,
                kind,
                unit,
                timestamp: now,
            };
            self.outputs.insert(update.sensor_id.clone(), update);
        }

        self.publish(now)
    }

    fn publish(&mut self, now: DateTime<Utc>) -> Vec<SensorUpdate> {
        if let Some(throttle) = self.throttle.as_mut() {
            if let Some(wait) = throttle.check(now) {
                if self.pending_timer.is_none() {
                    self.pending_timer = Some(self.scheduler.schedule_once(&self.config.id, wait));
                    debug!(group_id = %self.config.id, wait_ms = wait.as_millis() as u64, "Group update deferred");
                }
                return Vec::new();
            }
            if let Some(timer) = self.pending_timer.take() {
                self.scheduler.cancel(timer);
            }
        }
        self.outputs.values().cloned().collect()
    }

    /// Flush a deferred update
    pub fn on_timer(&mut self, fired: &TimerFired) -> Vec<SensorUpdate> {
        if self.pending_timer != Some(fired.id) {
            return Vec::new();
        }
        self.pending_timer = None;
        if let Some(throttle) = self.throttle.as_mut() {
            throttle.mark_published(fired.fired_at);
        }
        self.outputs
            .values()
            .map(|update| SensorUpdate {
                timestamp: fired.fired_at,
                ..update.clone()
            })
            .collect()
    }

    /// Reset the energy accumulators; returns the members the reset cascades to
    pub fn reset(&mut self, now: DateTime<Utc>) -> Result<Vec<String>> {
        if self.energy.is_none() && self.untracked_energy.is_none() {
            return Err(PowercalcError::UnsupportedMode(format!(
                "group {} has no energy total to reset",
                self.config.id
            )));
        }

        let mut cascade = Vec::new();
        if let Some(energy) = self.energy.as_mut() {
            energy.reset(now);
            cascade = self.topology.members();
        }
        if let Some(untracked) = self.untracked_energy.as_mut() {
            untracked.integrator.integrator_mut().reset();
            self.store.set(&untracked.id, 0.0, now);
        }
        self.refresh_energy_outputs(now);
        Ok(cascade)
    }

    /// Set an energy total to an absolute value without touching members
    pub fn calibrate(&mut self, sensor_id: &str, value: f64, now: DateTime<Utc>) -> Result<()> {
        match (&mut self.energy, &mut self.untracked_energy) {
            (Some(energy), _) if sensor_id == self.config.id => energy.calibrate(value, now),
            (_, Some(untracked)) if sensor_id == untracked.id => {
                untracked.integrator.integrator_mut().calibrate(value);
                self.store.set(&untracked.id, value, now);
            }
            _ => {
                return Err(PowercalcError::UnsupportedMode(format!(
                    "{} is not an energy sensor of group {}",
                    sensor_id, self.config.id
                )))
            }
        }
        self.refresh_energy_outputs(now);
        Ok(())
    }

    /// Updates for the energy sensors after a reset or calibration, never throttled
    pub fn energy_outputs(&self) -> Vec<SensorUpdate> {
        self.outputs
            .values()
            .filter(|update| update.kind == SensorKind::Energy)
            .cloned()
            .collect()
    }

    fn refresh_energy_outputs(&mut self, now: DateTime<Utc>) {
        let mut refreshed = Vec::new();
        if let Some(energy) = &self.energy {
            refreshed.push((self.config.id.clone(), round_to(energy.total(), self.precision), self.unit.clone()));
        }
        if let Some(untracked) = &self.untracked_energy {
            let integrator = untracked.integrator.integrator();
            refreshed.push((untracked.id.clone(), integrator.rounded_total(), integrator.unit()));
        }
        for (sensor_id, value, unit) in refreshed {
            self.outputs.insert(
                sensor_id.clone(),
                SensorUpdate {
                    sensor_id,
                    kind: SensorKind::Energy,
                    value: Some(value),
                    unit,
                    timestamp: now,
                },
            );
        }
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            self.scheduler.cancel(timer);
        }
    }
}
