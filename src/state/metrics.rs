use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Tracks processing metrics for a calculation session
#[derive(Clone)]
pub struct MetricsTracker {
    /// Total notifications processed (lifetime counter)
    total_notifications: Arc<AtomicU64>,

    /// Notification timestamps for rate calculation (sliding 5-second window)
    notification_timestamps: Arc<RwLock<VecDeque<i64>>>,

    /// Strategy calculations performed
    calculations: Arc<AtomicU64>,

    /// Calculations that produced no power
    unavailable_results: Arc<AtomicU64>,

    /// Energy deltas discarded because they were negative
    discarded_deltas: Arc<AtomicU64>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            total_notifications: Arc::new(AtomicU64::new(0)),
            notification_timestamps: Arc::new(RwLock::new(VecDeque::new())),
            calculations: Arc::new(AtomicU64::new(0)),
            unavailable_results: Arc::new(AtomicU64::new(0)),
            discarded_deltas: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a state notification (call from Session::handle_state)
    pub fn record_notification(&self) {
        self.total_notifications.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now().timestamp_millis();

        if let Ok(mut timestamps) = self.notification_timestamps.write() {
            timestamps.push_back(now);

            // Prune old timestamps (keep last 5 seconds)
            while let Some(&oldest) = timestamps.front() {
                if now - oldest > 5000 {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Record the outcome of a strategy calculation
    pub fn record_calculation(&self, produced_power: bool) {
        self.calculations.fetch_add(1, Ordering::Relaxed);
        if !produced_power {
            self.unavailable_results.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_discarded_delta(&self) {
        self.discarded_deltas.fetch_add(1, Ordering::Relaxed);
    }

    /// Notifications per second over the last 5 seconds
    pub fn get_notification_rate(&self) -> f64 {
        self.notification_timestamps
            .read()
            .map(|t| t.len() as f64 / 5.0)
            .unwrap_or(0.0)
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_notifications: self.total_notifications.load(Ordering::Relaxed),
            notification_rate: self.get_notification_rate(),
            calculations: self.calculations.load(Ordering::Relaxed),
            unavailable_results: self.unavailable_results.load(Ordering::Relaxed),
            discarded_deltas: self.discarded_deltas.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_notifications: u64,
    pub notification_rate: f64,
    pub calculations: u64,
    pub unavailable_results: u64,
    pub discarded_deltas: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_notification_recording() {
        let tracker = MetricsTracker::new();
        assert_eq!(tracker.get_snapshot().total_notifications, 0);

        tracker.record_notification();
        tracker.record_notification();
        assert_eq!(tracker.get_snapshot().total_notifications, 2);
    }

    #[test]
    fn test_notification_rate_calculation() {
        let tracker = MetricsTracker::new();

        for _ in 0..10 {
            tracker.record_notification();
        }

        // 10 notifications / 5s window
        assert_eq!(tracker.get_notification_rate(), 2.0);
    }

    #[test]
    fn test_calculation_outcomes() {
        let tracker = MetricsTracker::new();

        tracker.record_calculation(true);
        tracker.record_calculation(false);
        tracker.record_calculation(true);
        tracker.record_discarded_delta();

        let snapshot = tracker.get_snapshot();
        assert_eq!(snapshot.calculations, 3);
        assert_eq!(snapshot.unavailable_results, 1);
        assert_eq!(snapshot.discarded_deltas, 1);
    }

    #[test]
    fn test_concurrent_access() {
        let tracker = Arc::new(MetricsTracker::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let tracker_clone = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    tracker_clone.record_notification();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.get_snapshot().total_notifications, 1000);
    }
}
