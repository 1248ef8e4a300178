// Calculation session: wires sensors and groups to state notifications

use crate::config::{GroupConfig, PowerSensorConfig, PowercalcConfig};
use crate::error::{PowercalcError, Result};
use crate::group::{Group, SensorCatalog};
use crate::lut::LutRegistry;
use crate::scheduler::{Scheduler, TimerFired};
use crate::sensor::{read_value, SensorKind, SensorUpdate, VirtualEnergySensor, VirtualPowerSensor};
use crate::state::{EntityState, MetricsSnapshot, MetricsTracker, StateEngine, StateReader};
use crate::store::PreviousStateStore;
use crate::strategy::{PlaybookLoader, StrategyFactory};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests;

/// Derived states feeding further sensors stop propagating past this depth
const MAX_DEPTH: usize = 8;

/// Something that recalculates when an entity changes
#[derive(Debug, Clone, PartialEq, Eq)]
enum Consumer {
    Power(String),
    Energy(String),
    Group(String),
}

/// Owns every sensor and group plus the state cache they read.
///
/// Handlers take `&mut self` and run to completion, so each notification is
/// fully accounted before the next one starts.
pub struct Session {
    config: PowercalcConfig,
    states: StateEngine,
    factory: StrategyFactory,
    scheduler: Arc<dyn Scheduler>,
    store: Arc<PreviousStateStore>,
    catalog: SensorCatalog,
    power_sensors: HashMap<String, VirtualPowerSensor>,
    energy_sensors: HashMap<String, VirtualEnergySensor>,
    groups: HashMap<String, Group>,
    /// Published sensor id -> owning group id
    group_sensors: HashMap<String, String>,
    dependents: HashMap<String, Vec<Consumer>>,
    metrics: MetricsTracker,
    updates_tx: broadcast::Sender<SensorUpdate>,
}

impl Session {
    /// Create an empty session; sensors and groups are added afterwards
    pub fn new(
        config: PowercalcConfig,
        lut_registry: Arc<LutRegistry>,
        scheduler: Arc<dyn Scheduler>,
        playbook_loader: Arc<dyn PlaybookLoader>,
        store: Arc<PreviousStateStore>,
    ) -> Self {
        let (updates_tx, _) = broadcast::channel(1000);
        let factory = StrategyFactory::new(lut_registry, Arc::clone(&scheduler), playbook_loader);

        Self {
            config,
            states: StateEngine::new(),
            factory,
            scheduler,
            store,
            catalog: SensorCatalog::new(),
            power_sensors: HashMap::new(),
            energy_sensors: HashMap::new(),
            groups: HashMap::new(),
            group_sensors: HashMap::new(),
            dependents: HashMap::new(),
            metrics: MetricsTracker::new(),
            updates_tx,
        }
    }

    /// Build a session with every `[[sensors]]` and `[[groups]]` entry.
    ///
    /// An invalid entry is logged and skipped; it never affects the others.
    pub fn from_config(
        mut config: PowercalcConfig,
        lut_registry: Arc<LutRegistry>,
        scheduler: Arc<dyn Scheduler>,
        playbook_loader: Arc<dyn PlaybookLoader>,
        store: Arc<PreviousStateStore>,
    ) -> Self {
        let sensors = std::mem::take(&mut config.sensors);
        let groups = std::mem::take(&mut config.groups);
        let mut session = Self::new(config, lut_registry, scheduler, playbook_loader, store);

        for sensor in sensors {
            let entity_id = sensor.entity_id.clone();
            if let Err(e) = session.add_power_sensor(sensor) {
                error!(entity_id = %entity_id, error = %e, "Failed to create power sensor");
            }
        }
        for group in groups {
            let group_id = group.id.clone();
            if let Err(e) = session.add_group(group) {
                error!(group_id = %group_id, error = %e, "Failed to create group");
            }
        }

        info!(
            power_sensors = session.power_sensors.len(),
            energy_sensors = session.energy_sensors.len(),
            groups = session.groups.len(),
            "Session ready"
        );
        session
    }

    fn ensure_unused(&self, sensor_id: &str) -> Result<()> {
        let taken = self.power_sensors.contains_key(sensor_id)
            || self.energy_sensors.contains_key(sensor_id)
            || self.group_sensors.contains_key(sensor_id);
        if taken {
            return Err(PowercalcError::SensorConfiguration(format!(
                "sensor id {} is already in use",
                sensor_id
            )));
        }
        Ok(())
    }

    fn add_dependent(&mut self, entity_id: &str, consumer: Consumer) {
        let consumers = self.dependents.entry(entity_id.to_string()).or_default();
        if !consumers.contains(&consumer) {
            consumers.push(consumer);
        }
    }

    /// Add a virtual power sensor (and its energy sensor if requested); returns its id
    pub fn add_power_sensor(&mut self, config: PowerSensorConfig) -> Result<String> {
        let sensor = VirtualPowerSensor::new(config, &self.config.power, &self.factory)?;
        let id = sensor.id().to_string();
        self.ensure_unused(&id)?;

        let energy_id = sensor.config().create_energy_sensor.then(|| {
            sensor
                .config()
                .energy_sensor_id
                .clone()
                .unwrap_or_else(|| format!("sensor.{}_energy", sensor.source().object_id))
        });
        if let Some(energy_id) = &energy_id {
            self.ensure_unused(energy_id)?;
        }

        let domain = sensor.source().domain.clone();
        for entity_id in sensor.tracked_entities() {
            self.add_dependent(&entity_id, Consumer::Power(id.clone()));
        }
        self.catalog.add(&id, SensorKind::Power, &domain);
        self.power_sensors.insert(id.clone(), sensor);

        if let Some(energy_id) = energy_id {
            let energy = VirtualEnergySensor::new(
                &energy_id,
                &id,
                self.config.energy.clone(),
                Arc::clone(&self.store),
            );
            self.add_dependent(&id, Consumer::Energy(energy_id.clone()));
            self.catalog.add(&energy_id, SensorKind::Energy, &domain);
            self.energy_sensors.insert(energy_id.clone(), energy);
            info!(sensor_id = %energy_id, power_sensor_id = %id, "Energy sensor created");
        }

        Ok(id)
    }

    /// Add a group; returns its id
    pub fn add_group(&mut self, config: GroupConfig) -> Result<String> {
        let group = Group::new(
            config,
            &self.catalog,
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.scheduler),
        )?;
        let id = group.id().to_string();
        for sensor_id in group.sensor_ids() {
            self.ensure_unused(&sensor_id)?;
        }

        for member in group.members() {
            self.add_dependent(&member, Consumer::Group(id.clone()));
        }
        for sensor_id in group.sensor_ids() {
            self.group_sensors.insert(sensor_id, id.clone());
        }
        self.groups.insert(id.clone(), group);
        Ok(id)
    }

    /// Apply a state notification and everything derived from it
    pub fn handle_state(&mut self, state: EntityState) -> Vec<SensorUpdate> {
        self.metrics.record_notification();
        let mut queue = VecDeque::new();
        queue.push_back((state, 0));
        self.process(queue)
    }

    /// Deliver a fired timer to the sensor or group that scheduled it
    pub fn handle_timer(&mut self, fired: TimerFired) -> Vec<SensorUpdate> {
        let updates = if let Some(sensor) = self.power_sensors.get_mut(&fired.owner) {
            match sensor.on_timer(&fired, &self.states) {
                Some(power) => vec![SensorUpdate {
                    sensor_id: fired.owner.clone(),
                    kind: SensorKind::Power,
                    value: Some(power),
                    unit: SensorKind::Power.default_unit().to_string(),
                    timestamp: fired.fired_at,
                }],
                None => Vec::new(),
            }
        } else if let Some(group) = self.groups.get_mut(&fired.owner) {
            group.on_timer(&fired)
        } else {
            debug!(owner = %fired.owner, timer = %fired.id, "Timer for unknown owner");
            Vec::new()
        };

        self.publish(updates)
    }

    /// Broadcast updates and feed them back in as entity states
    fn publish(&mut self, updates: Vec<SensorUpdate>) -> Vec<SensorUpdate> {
        let mut published = Vec::new();
        let mut queue = VecDeque::new();
        for update in updates {
            queue.push_back((update.to_entity_state(), 1));
            let _ = self.updates_tx.send(update.clone());
            published.push(update);
        }
        published.extend(self.process(queue));
        published
    }

    fn process(&mut self, mut queue: VecDeque<(EntityState, usize)>) -> Vec<SensorUpdate> {
        let mut published = Vec::new();

        while let Some((state, depth)) = queue.pop_front() {
            let entity_id = state.entity_id.clone();
            let now = state.last_updated;
            self.states.update_state(state);

            let Some(consumers) = self.dependents.get(&entity_id).cloned() else {
                continue;
            };
            if depth >= MAX_DEPTH {
                warn!(entity_id = %entity_id, depth, "Update chain too deep, not propagating");
                continue;
            }

            for consumer in consumers {
                for update in self.run_consumer(&consumer, &entity_id, now) {
                    queue.push_back((update.to_entity_state(), depth + 1));
                    // No receivers is fine
                    let _ = self.updates_tx.send(update.clone());
                    published.push(update);
                }
            }
        }

        published
    }

    fn run_consumer(&mut self, consumer: &Consumer, changed: &str, now: DateTime<Utc>) -> Vec<SensorUpdate> {
        match consumer {
            Consumer::Power(id) => {
                let Some(sensor) = self.power_sensors.get_mut(id) else {
                    return Vec::new();
                };
                let Some(source_state) = self.states.get_state(&sensor.source().entity_id) else {
                    debug!(sensor_id = %id, "Source entity has no state yet");
                    return Vec::new();
                };
                let power = sensor.calculate(&source_state, &self.states, &self.factory, now);
                self.metrics.record_calculation(power.is_some());
                vec![SensorUpdate {
                    sensor_id: id.clone(),
                    kind: SensorKind::Power,
                    value: power,
                    unit: SensorKind::Power.default_unit().to_string(),
                    timestamp: now,
                }]
            }
            Consumer::Energy(id) => {
                let Some(sensor) = self.energy_sensors.get_mut(id) else {
                    return Vec::new();
                };
                let power = self
                    .states
                    .get_state(sensor.power_sensor_id())
                    .and_then(|state| read_value(&state, SensorKind::Power, "W"));
                let energy = sensor.add_power(now, power);
                vec![SensorUpdate {
                    sensor_id: id.clone(),
                    kind: SensorKind::Energy,
                    value: Some(energy),
                    unit: sensor.unit(),
                    timestamp: now,
                }]
            }
            Consumer::Group(id) => match self.groups.get_mut(id) {
                Some(group) => group.update(Some(changed), &self.states, now, &self.metrics),
                None => Vec::new(),
            },
        }
    }

    /// Last power published by a virtual power sensor or power group
    pub fn get_power(&self, sensor_id: &str) -> Option<f64> {
        if let Some(sensor) = self.power_sensors.get(sensor_id) {
            return sensor.power();
        }
        self.group_for(sensor_id)?
            .output(sensor_id)
            .filter(|update| update.kind == SensorKind::Power)?
            .value
    }

    /// Current total of an energy sensor or energy group
    pub fn get_energy(&self, sensor_id: &str) -> Option<f64> {
        if let Some(sensor) = self.energy_sensors.get(sensor_id) {
            return Some(sensor.energy());
        }
        self.group_for(sensor_id)?.energy_total(sensor_id)
    }

    fn group_for(&self, sensor_id: &str) -> Option<&Group> {
        self.group_sensors
            .get(sensor_id)
            .and_then(|group_id| self.groups.get(group_id))
    }

    /// Reset an energy sensor or group to zero; group resets cascade to members
    pub fn reset(&mut self, sensor_id: &str) -> Result<Vec<SensorUpdate>> {
        let now = self.scheduler.now();
        let mut updates = Vec::new();
        let mut visited = HashSet::new();
        self.reset_cascade(sensor_id, now, &mut visited, &mut updates)?;
        Ok(self.publish(updates))
    }

    fn reset_cascade(
        &mut self,
        sensor_id: &str,
        now: DateTime<Utc>,
        visited: &mut HashSet<String>,
        updates: &mut Vec<SensorUpdate>,
    ) -> Result<()> {
        if !visited.insert(sensor_id.to_string()) {
            return Ok(());
        }

        if let Some(sensor) = self.energy_sensors.get_mut(sensor_id) {
            sensor.reset(now);
            updates.push(SensorUpdate {
                sensor_id: sensor_id.to_string(),
                kind: SensorKind::Energy,
                value: Some(sensor.energy()),
                unit: sensor.unit(),
                timestamp: now,
            });
            return Ok(());
        }

        let group_id = self.group_sensors.get(sensor_id).cloned().ok_or_else(|| {
            PowercalcError::UnsupportedMode(format!("{} is not an energy sensor", sensor_id))
        })?;
        let Some(group) = self.groups.get_mut(&group_id) else {
            return Ok(());
        };
        let members = group.reset(now)?;
        updates.extend(group.energy_outputs());

        for member in members {
            let resettable = self.energy_sensors.contains_key(&member)
                || self.group_for(&member).is_some_and(|g| g.kind() == SensorKind::Energy);
            if resettable {
                self.reset_cascade(&member, now, visited, updates)?;
            }
        }
        Ok(())
    }

    /// Set an energy sensor or group total to an absolute value
    pub fn calibrate(&mut self, sensor_id: &str, value: f64) -> Result<Vec<SensorUpdate>> {
        let now = self.scheduler.now();

        let updates = if let Some(sensor) = self.energy_sensors.get_mut(sensor_id) {
            sensor.calibrate(value, now);
            vec![SensorUpdate {
                sensor_id: sensor_id.to_string(),
                kind: SensorKind::Energy,
                value: Some(sensor.energy()),
                unit: sensor.unit(),
                timestamp: now,
            }]
        } else {
            let group_id = self.group_sensors.get(sensor_id).cloned().ok_or_else(|| {
                PowercalcError::UnsupportedMode(format!("{} is not an energy sensor", sensor_id))
            })?;
            let group = self.groups.get_mut(&group_id).ok_or_else(|| {
                PowercalcError::UnsupportedMode(format!("{} is not an energy sensor", sensor_id))
            })?;
            group.calibrate(sensor_id, value, now)?;
            group
                .energy_outputs()
                .into_iter()
                .filter(|update| update.sensor_id == sensor_id)
                .collect()
        };

        Ok(self.publish(updates))
    }

    pub fn activate_playbook(&mut self, sensor_id: &str, playbook_id: &str) -> Result<()> {
        self.power_sensor_mut(sensor_id)?.activate_playbook(playbook_id)
    }

    pub fn stop_playbook(&mut self, sensor_id: &str) -> Result<()> {
        self.power_sensor_mut(sensor_id)?.stop_playbook()
    }

    fn power_sensor_mut(&mut self, sensor_id: &str) -> Result<&mut VirtualPowerSensor> {
        self.power_sensors.get_mut(sensor_id).ok_or_else(|| {
            PowercalcError::SensorConfiguration(format!("unknown power sensor {}", sensor_id))
        })
    }

    /// Subscribe to every published sensor update
    pub fn subscribe(&self) -> broadcast::Receiver<SensorUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.get_snapshot()
    }

    pub fn states(&self) -> &StateEngine {
        &self.states
    }

    pub fn store(&self) -> &Arc<PreviousStateStore> {
        &self.store
    }

    pub fn power_sensor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.power_sensors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn energy_sensor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.energy_sensors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.groups.keys().cloned().collect();
        ids.sort();
        ids
    }
}
