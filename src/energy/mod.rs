// Power to energy conversion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod gate;

pub use gate::{GatedIntegrator, ThresholdGate};

/// Riemann sum rule applied between two successive samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    #[default]
    Trapezoidal,
    Left,
    Right,
}

impl IntegrationMethod {
    /// Area in watt-seconds between two samples `elapsed` seconds apart
    pub fn area(&self, elapsed: f64, previous: f64, current: f64) -> f64 {
        match self {
            IntegrationMethod::Trapezoidal => elapsed * (previous + current) / 2.0,
            IntegrationMethod::Left => elapsed * previous,
            IntegrationMethod::Right => elapsed * current,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPrefix {
    None,
    #[default]
    Kilo,
    Mega,
}

impl UnitPrefix {
    pub fn factor(&self) -> f64 {
        match self {
            UnitPrefix::None => 1.0,
            UnitPrefix::Kilo => 1_000.0,
            UnitPrefix::Mega => 1_000_000.0,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            UnitPrefix::None => "",
            UnitPrefix::Kilo => "k",
            UnitPrefix::Mega => "M",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitTime {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "min")]
    Minutes,
    #[default]
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl UnitTime {
    pub fn seconds(&self) -> f64 {
        match self {
            UnitTime::Seconds => 1.0,
            UnitTime::Minutes => 60.0,
            UnitTime::Hours => 3_600.0,
            UnitTime::Days => 86_400.0,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            UnitTime::Seconds => "s",
            UnitTime::Minutes => "min",
            UnitTime::Hours => "h",
            UnitTime::Days => "d",
        }
    }
}

/// Integration settings, the `[energy]` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergySettings {
    #[serde(default)]
    pub integration_method: IntegrationMethod,
    #[serde(default)]
    pub unit_prefix: UnitPrefix,
    #[serde(default)]
    pub unit_time: UnitTime,
    #[serde(default = "default_precision")]
    pub precision: Option<u32>,
}

fn default_precision() -> Option<u32> {
    Some(4)
}

impl Default for EnergySettings {
    fn default() -> Self {
        Self {
            integration_method: IntegrationMethod::default(),
            unit_prefix: UnitPrefix::default(),
            unit_time: UnitTime::default(),
            precision: default_precision(),
        }
    }
}

impl EnergySettings {
    /// Unit of the integrated value, e.g. "kWh"
    pub fn unit(&self) -> String {
        format!("{}W{}", self.unit_prefix.symbol(), self.unit_time.symbol())
    }

    fn divisor(&self) -> f64 {
        self.unit_prefix.factor() * self.unit_time.seconds()
    }
}

/// Round to `decimals` places; `None` leaves the value untouched
pub fn round_to(value: f64, decimals: Option<u32>) -> f64 {
    match decimals {
        Some(decimals) => {
            let factor = 10f64.powi(decimals.min(12) as i32);
            (value * factor).round() / factor
        }
        None => value,
    }
}

/// Accumulates energy from successive (timestamp, power) samples of one signal
#[derive(Debug, Clone)]
pub struct RiemannSumIntegrator {
    settings: EnergySettings,
    last_sample: Option<(DateTime<Utc>, f64)>,
    total: f64,
}

impl RiemannSumIntegrator {
    pub fn new(settings: EnergySettings) -> Self {
        Self::with_total(settings, 0.0)
    }

    /// Continue from a restored total
    pub fn with_total(settings: EnergySettings, total: f64) -> Self {
        Self {
            settings,
            last_sample: None,
            total,
        }
    }

    /// Add a sample and return the energy it contributed.
    ///
    /// `None` (unavailable power) breaks the series: no area is accrued across
    /// the gap. Out-of-order samples replace the previous one without accruing.
    pub fn add_sample(&mut self, timestamp: DateTime<Utc>, power: Option<f64>) -> f64 {
        let Some(power) = power.filter(|p| p.is_finite()) else {
            self.last_sample = None;
            return 0.0;
        };

        let delta = match self.last_sample {
            Some((last_ts, last_power)) if timestamp > last_ts => {
                let elapsed = (timestamp - last_ts).num_milliseconds() as f64 / 1000.0;
                let area = self.settings.integration_method.area(elapsed, last_power, power);
                area / self.settings.divisor()
            }
            _ => 0.0,
        };

        // Power below zero would make the counter run backwards
        let delta = delta.max(0.0);
        self.total += delta;
        self.last_sample = Some((timestamp, power));
        delta
    }

    /// Accrue the last sample's power up to `now` without a new reading
    pub fn integrate_until(&mut self, now: DateTime<Utc>) -> f64 {
        match self.last_sample {
            Some((_, power)) => self.add_sample(now, Some(power)),
            None => 0.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// Total rounded to the configured precision
    pub fn rounded_total(&self) -> f64 {
        round_to(self.total, self.settings.precision)
    }

    pub fn unit(&self) -> String {
        self.settings.unit()
    }

    pub fn settings(&self) -> &EnergySettings {
        &self.settings
    }

    pub fn reset(&mut self) {
        self.total = 0.0;
        self.last_sample = None;
    }

    pub fn calibrate(&mut self, value: f64) {
        self.total = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
    }

    fn settings(method: IntegrationMethod, prefix: UnitPrefix) -> EnergySettings {
        EnergySettings {
            integration_method: method,
            unit_prefix: prefix,
            unit_time: UnitTime::Hours,
            precision: None,
        }
    }

    #[test]
    fn test_trapezoidal_one_hour() {
        let mut integrator = RiemannSumIntegrator::new(settings(IntegrationMethod::Trapezoidal, UnitPrefix::None));
        integrator.add_sample(at(0), Some(100.0));
        integrator.add_sample(at(3600), Some(200.0));
        assert_eq!(integrator.total(), 150.0);
        assert_eq!(integrator.unit(), "Wh");
    }

    #[test]
    fn test_left_and_right_rules() {
        let mut left = RiemannSumIntegrator::new(settings(IntegrationMethod::Left, UnitPrefix::Kilo));
        let mut right = RiemannSumIntegrator::new(settings(IntegrationMethod::Right, UnitPrefix::Kilo));
        for integrator in [&mut left, &mut right] {
            integrator.add_sample(at(0), Some(1000.0));
            integrator.add_sample(at(1800), Some(3000.0));
        }
        assert_eq!(left.total(), 0.5);
        assert_eq!(right.total(), 1.5);
        assert_eq!(left.unit(), "kWh");
    }

    #[test]
    fn test_unavailable_breaks_series() {
        let mut integrator = RiemannSumIntegrator::new(settings(IntegrationMethod::Left, UnitPrefix::None));
        integrator.add_sample(at(0), Some(60.0));
        integrator.add_sample(at(60), None);
        integrator.add_sample(at(3600), Some(60.0));
        assert_eq!(integrator.total(), 0.0);

        integrator.add_sample(at(7200), Some(60.0));
        assert_eq!(integrator.total(), 60.0);
    }

    #[test]
    fn test_out_of_order_sample_does_not_accrue() {
        let mut integrator = RiemannSumIntegrator::new(settings(IntegrationMethod::Left, UnitPrefix::None));
        integrator.add_sample(at(3600), Some(10.0));
        assert_eq!(integrator.add_sample(at(0), Some(10.0)), 0.0);
        assert_eq!(integrator.total(), 0.0);
    }

    #[test]
    fn test_integrate_until_extends_last_sample() {
        let mut integrator = RiemannSumIntegrator::new(settings(IntegrationMethod::Trapezoidal, UnitPrefix::None));
        integrator.add_sample(at(0), Some(30.0));
        integrator.integrate_until(at(7200));
        assert_eq!(integrator.total(), 60.0);
    }

    #[test]
    fn test_reset_and_calibrate() {
        let mut integrator =
            RiemannSumIntegrator::with_total(settings(IntegrationMethod::Left, UnitPrefix::None), 12.5);
        assert_eq!(integrator.total(), 12.5);
        integrator.calibrate(100.0);
        assert_eq!(integrator.total(), 100.0);
        integrator.reset();
        assert_eq!(integrator.total(), 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, Some(2)), 1.23);
        assert_eq!(round_to(52.550000000000004, Some(2)), 52.55);
        assert_eq!(round_to(1.23456, None), 1.23456);
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: EnergySettings = toml::from_str(
            r#"
            integration_method = "left"
            unit_prefix = "none"
            unit_time = "min"
        "#,
        )
        .unwrap();
        assert_eq!(settings.integration_method, IntegrationMethod::Left);
        assert_eq!(settings.unit(), "Wmin");
        assert_eq!(settings.precision, Some(4));
    }
}
