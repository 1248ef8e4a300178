use crate::error::{PowercalcError, Result};

/// Ordered (x, power) breakpoints with linear interpolation between them.
///
/// Points are sorted ascending by x and x values are unique; a later entry
/// with the same x replaces an earlier one.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    points: Vec<(f64, f64)>,
}

impl CalibrationTable {
    pub fn new(mut points: Vec<(f64, f64)>) -> Result<Self> {
        if points.is_empty() {
            return Err(PowercalcError::StrategyConfiguration(
                "calibration table needs at least one point".to_string(),
            ));
        }
        if points.iter().any(|(x, p)| !x.is_finite() || !p.is_finite()) {
            return Err(PowercalcError::StrategyConfiguration(
                "calibration points must be finite numbers".to_string(),
            ));
        }

        // Stable sort keeps insertion order among equal keys, dedup keeps the last one
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut deduped: Vec<(f64, f64)> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.0 == point.0 => *last = point,
                _ => deduped.push(point),
            }
        }

        Ok(Self { points: deduped })
    }

    /// Parse entries of the form `"x -> power"`
    ///
    /// ```
    /// use powercalc::calibration::CalibrationTable;
    ///
    /// let table = CalibrationTable::parse(&["1 -> 0.3", "255 -> 5.2"]).unwrap();
    /// assert_eq!(table.interpolate(255.0), 5.2);
    /// ```
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let points = entries
            .iter()
            .map(|entry| {
                let entry = entry.as_ref();
                let (x, power) = entry.split_once("->").ok_or_else(|| {
                    PowercalcError::StrategyConfiguration(format!(
                        "calibration entry '{}' must look like 'value -> power'",
                        entry
                    ))
                })?;
                let parse = |s: &str| {
                    s.trim().parse::<f64>().map_err(|_| {
                        PowercalcError::StrategyConfiguration(format!(
                            "calibration entry '{}' is not numeric",
                            entry
                        ))
                    })
                };
                Ok((parse(x)?, parse(power)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(points)
    }

    /// Synthesize breakpoints over `[min_x, max_x]` from declared min/max power.
    ///
    /// A gamma of 1 yields the two endpoints only; any other gamma samples
    /// every integer step of the range along `min_p + range * rel^gamma`.
    pub fn from_range(min_x: f64, max_x: f64, min_power: f64, max_power: f64, gamma: f64) -> Result<Self> {
        if max_x <= min_x {
            return Err(PowercalcError::StrategyConfiguration(format!(
                "value range {}..{} is empty",
                min_x, max_x
            )));
        }

        if (gamma - 1.0).abs() < f64::EPSILON {
            return Self::new(vec![(min_x, min_power), (max_x, max_power)]);
        }

        let value_range = max_x - min_x;
        let power_range = max_power - min_power;
        let steps = value_range.ceil() as usize;
        let points = (0..=steps)
            .map(|i| {
                let x = (min_x + i as f64).min(max_x);
                let relative = (x - min_x) / value_range;
                (x, min_power + power_range * relative.powf(gamma))
            })
            .collect();

        Self::new(points)
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn min_x(&self) -> f64 {
        self.points[0].0
    }

    pub fn max_x(&self) -> f64 {
        self.points[self.points.len() - 1].0
    }

    /// Nearest breakpoint at or below `x` and nearest at or above it.
    ///
    /// Values outside the table clamp to the nearest endpoint, returned twice.
    /// NaN clamps to the first point.
    pub fn bracket(&self, x: f64) -> ((f64, f64), (f64, f64)) {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if x.is_nan() || x <= first.0 {
            return (first, first);
        }
        if x >= last.0 {
            return (last, last);
        }

        // First index whose x is >= value
        let upper_idx = self.points.partition_point(|(px, _)| *px < x);
        let upper = self.points[upper_idx];
        if upper.0 == x {
            return (upper, upper);
        }
        (self.points[upper_idx - 1], upper)
    }

    pub fn interpolate(&self, x: f64) -> f64 {
        let ((min_x, min_p), (max_x, max_p)) = self.bracket(x);
        interpolate_between(x, min_x, min_p, max_x, max_p)
    }
}

/// Linear interpolation between two points, `min_p` when they coincide
pub fn interpolate_between(x: f64, min_x: f64, min_p: f64, max_x: f64, max_p: f64) -> f64 {
    let width = max_x - min_x;
    if width == 0.0 {
        return min_p;
    }
    min_p + (x - min_x) * (max_p - min_p) / width
}
