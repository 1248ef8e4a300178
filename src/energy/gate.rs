use crate::energy::{EnergySettings, RiemannSumIntegrator};
use crate::scheduler::to_chrono;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Opens once power has stayed above `threshold` for `min_dwell`
#[derive(Debug, Clone)]
pub struct ThresholdGate {
    threshold: f64,
    min_dwell: Duration,
    above_since: Option<DateTime<Utc>>,
}

impl ThresholdGate {
    pub fn new(threshold: f64, min_dwell: Duration) -> Self {
        Self {
            threshold,
            min_dwell,
            above_since: None,
        }
    }

    /// Feed a reading; true while the gate is open
    pub fn admit(&mut self, timestamp: DateTime<Utc>, power: f64) -> bool {
        if power <= self.threshold {
            self.above_since = None;
            return false;
        }
        let since = *self.above_since.get_or_insert(timestamp);
        timestamp - since >= to_chrono(self.min_dwell)
    }
}

/// Integrates only the samples a [`ThresholdGate`] admits
#[derive(Debug, Clone)]
pub struct GatedIntegrator {
    gate: ThresholdGate,
    integrator: RiemannSumIntegrator,
}

impl GatedIntegrator {
    pub fn new(gate: ThresholdGate, settings: EnergySettings, total: f64) -> Self {
        Self {
            gate,
            integrator: RiemannSumIntegrator::with_total(settings, total),
        }
    }

    pub fn add_sample(&mut self, timestamp: DateTime<Utc>, power: Option<f64>) -> f64 {
        match power {
            Some(p) if self.gate.admit(timestamp, p) => self.integrator.add_sample(timestamp, Some(p)),
            Some(_) => {
                // Close the series at the gate so no area spans a closed period
                self.integrator.add_sample(timestamp, None)
            }
            None => {
                self.gate.above_since = None;
                self.integrator.add_sample(timestamp, None)
            }
        }
    }

    pub fn integrator(&self) -> &RiemannSumIntegrator {
        &self.integrator
    }

    pub fn integrator_mut(&mut self) -> &mut RiemannSumIntegrator {
        &mut self.integrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::{IntegrationMethod, UnitPrefix, UnitTime};
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
    }

    #[test]
    fn test_gate_requires_dwell() {
        let mut gate = ThresholdGate::new(50.0, Duration::from_secs(60));
        assert!(!gate.admit(at(0), 80.0));
        assert!(!gate.admit(at(30), 80.0));
        assert!(gate.admit(at(60), 80.0));

        // Dropping below resets the dwell timer
        assert!(!gate.admit(at(90), 10.0));
        assert!(!gate.admit(at(100), 80.0));
        assert!(gate.admit(at(160), 80.0));
    }

    #[test]
    fn test_gated_integration() {
        let settings = EnergySettings {
            integration_method: IntegrationMethod::Left,
            unit_prefix: UnitPrefix::None,
            unit_time: UnitTime::Hours,
            precision: None,
        };
        let mut integrator = GatedIntegrator::new(ThresholdGate::new(20.0, Duration::ZERO), settings, 0.0);

        integrator.add_sample(at(0), Some(10.0));
        integrator.add_sample(at(3600), Some(100.0));
        integrator.add_sample(at(7200), Some(100.0));
        integrator.add_sample(at(10800), Some(5.0));
        integrator.add_sample(at(14400), Some(100.0));

        // Only the hour between the two admitted 100 W readings counts
        assert_eq!(integrator.integrator().total(), 100.0);
    }
}
