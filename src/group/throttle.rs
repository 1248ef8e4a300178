use crate::scheduler::to_chrono;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Coalesces publications to at most one per interval.
///
/// During the startup window after activation every update is published.
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    interval: Duration,
    startup_window: Duration,
    activated_at: DateTime<Utc>,
    last_published: Option<DateTime<Utc>>,
}

impl UpdateThrottle {
    pub fn new(interval: Duration, startup_window: Duration, activated_at: DateTime<Utc>) -> Self {
        Self {
            interval,
            startup_window,
            activated_at,
            last_published: None,
        }
    }

    /// `None` when an update may go out now, otherwise the wait until it may.
    ///
    /// Publications inside the startup window do not start an interval.
    pub fn check(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        if self.interval.is_zero() || now - self.activated_at < to_chrono(self.startup_window) {
            return None;
        }

        if let Some(last) = self.last_published {
            let due = last + to_chrono(self.interval);
            if due > now {
                return Some((due - now).to_std().unwrap_or(Duration::ZERO));
            }
        }
        self.last_published = Some(now);
        None
    }

    pub fn mark_published(&mut self, now: DateTime<Utc>) {
        self.last_published = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
    }

    #[test]
    fn test_startup_window_publishes_everything() {
        let mut throttle = UpdateThrottle::new(Duration::from_secs(60), Duration::from_secs(5), at(0));
        assert_eq!(throttle.check(at(1)), None);
        assert_eq!(throttle.check(at(2)), None);
        assert_eq!(throttle.check(at(4)), None);
    }

    #[test]
    fn test_coalesces_after_startup() {
        let mut throttle = UpdateThrottle::new(Duration::from_secs(60), Duration::from_secs(5), at(0));
        assert_eq!(throttle.check(at(10)), None);
        assert_eq!(throttle.check(at(30)), Some(Duration::from_secs(40)));
        assert_eq!(throttle.check(at(69)), Some(Duration::from_secs(1)));
        assert_eq!(throttle.check(at(70)), None);
    }

    #[test]
    fn test_zero_interval_never_throttles() {
        let mut throttle = UpdateThrottle::new(Duration::ZERO, Duration::ZERO, at(0));
        assert_eq!(throttle.check(at(10)), None);
        assert_eq!(throttle.check(at(10)), None);
    }
}
