use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle for one scheduled callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Delivered to the owning sensor when a timer expires
#[derive(Debug, Clone, PartialEq)]
pub struct TimerFired {
    pub id: TimerId,
    /// Sensor id that scheduled the timer
    pub owner: String,
    pub fired_at: DateTime<Utc>,
}

/// Schedule-once / cancel capability plus the clock it runs on.
///
/// Fired timers are not callbacks: they come back to the session as
/// [`TimerFired`] values and are dispatched to the owner like any other event.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, owner: &str, delay: Duration) -> TimerId;
    fn cancel(&self, id: TimerId);
    fn now(&self) -> DateTime<Utc>;
}

pub(crate) fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
}

/// Wall-clock scheduler backed by tokio tasks
pub struct TokioScheduler {
    next_id: AtomicU64,
    pending: Arc<DashMap<TimerId, JoinHandle<()>>>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TokioScheduler {
    /// Create the scheduler and the receiver fired timers are delivered on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            fired_tx,
        };
        (scheduler, fired_rx)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|h| !h.value().is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, owner: &str, delay: Duration) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tx = self.fired_tx.clone();
        let pending = Arc::clone(&self.pending);
        let owner = owner.to_string();

        // Zero-delay timers can finish before their handle is stored
        self.pending.retain(|_, handle| !handle.is_finished());

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove(&id);
            let _ = tx.send(TimerFired {
                id,
                owner,
                fired_at: Utc::now(),
            });
        });
        self.pending.insert(id, handle);

        debug!(timer = %id, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some((_, handle)) = self.pending.remove(&id) {
            handle.abort();
            debug!(timer = %id, "Timer cancelled");
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic scheduler with a manually advanced clock.
///
/// Used for offline replay and in tests; timers fire only when the caller
/// pulls them with [`ManualScheduler::next_due`].
pub struct ManualScheduler {
    next_id: AtomicU64,
    now: Mutex<DateTime<Utc>>,
    pending: Mutex<BTreeMap<(DateTime<Utc>, TimerId), String>>,
}

impl ManualScheduler {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            now: Mutex::new(start),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to its due time
    pub fn next_due(&self, until: DateTime<Utc>) -> Option<TimerFired> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let (&(due, id), _) = pending.iter().next()?;
        if due > until {
            return None;
        }
        let owner = pending.remove(&(due, id))?;
        drop(pending);

        self.set_now(due);
        Some(TimerFired {
            id,
            owner,
            fired_at: due,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, owner: &str, delay: Duration) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let due = self
            .now()
            .checked_add_signed(to_chrono(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((due, id), owner.to_string());
        id
    }

    fn cancel(&self, id: TimerId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(_, pending_id), _| *pending_id != id);
    }

    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
