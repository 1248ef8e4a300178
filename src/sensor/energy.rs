use crate::energy::{EnergySettings, RiemannSumIntegrator};
use crate::store::PreviousStateStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Integrates one power sensor's output into cumulative energy.
///
/// The total is kept in the previous-state store under the sensor id so it
/// survives restarts.
pub struct VirtualEnergySensor {
    id: String,
    power_sensor_id: String,
    integrator: RiemannSumIntegrator,
    store: Arc<PreviousStateStore>,
}

impl VirtualEnergySensor {
    pub fn new(id: &str, power_sensor_id: &str, settings: EnergySettings, store: Arc<PreviousStateStore>) -> Self {
        let restored = store.get(id).map(|stored| stored.value);
        if let Some(total) = restored {
            info!(sensor_id = %id, total, "Restored energy total");
        }

        Self {
            id: id.to_string(),
            power_sensor_id: power_sensor_id.to_string(),
            integrator: RiemannSumIntegrator::with_total(settings, restored.unwrap_or(0.0)),
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn power_sensor_id(&self) -> &str {
        &self.power_sensor_id
    }

    /// Feed the power sensor's latest value; returns the rounded total
    pub fn add_power(&mut self, timestamp: DateTime<Utc>, power: Option<f64>) -> f64 {
        let delta = self.integrator.add_sample(timestamp, power);
        if delta > 0.0 {
            self.store.set(&self.id, self.integrator.total(), timestamp);
        }
        self.energy()
    }

    pub fn energy(&self) -> f64 {
        self.integrator.rounded_total()
    }

    pub fn unit(&self) -> String {
        self.integrator.unit()
    }

    pub fn reset(&mut self, timestamp: DateTime<Utc>) {
        self.integrator.reset();
        self.store.set(&self.id, 0.0, timestamp);
        info!(sensor_id = %self.id, "Energy sensor reset");
    }

    pub fn calibrate(&mut self, value: f64, timestamp: DateTime<Utc>) {
        self.integrator.calibrate(value);
        self.store.set(&self.id, value, timestamp);
        info!(sensor_id = %self.id, value, "Energy sensor calibrated");
    }
}
