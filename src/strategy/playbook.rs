use crate::entity::MonitoredEntity;
use crate::error::{PowercalcError, Result};
use crate::scheduler::{to_chrono, Scheduler, TimerFired, TimerId};
use crate::state::EntityState;
use crate::strategy::{CalculationContext, PowerCalculationStrategy, StrategyKind};
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One step of a recorded power curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybookEntry {
    /// Time since activation
    pub offset: Duration,
    pub power: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybookConfig {
    /// Playbook id -> reference handed to the loader
    pub playbooks: BTreeMap<String, String>,
    #[serde(default)]
    pub repeat: bool,
    /// Played on the first calculation
    #[serde(default)]
    pub autostart: Option<String>,
    /// Source state -> playbook id played while the entity is in that state
    #[serde(default)]
    pub states_trigger: BTreeMap<String, String>,
}

/// Resolves a playbook reference into parsed entries
pub trait PlaybookLoader: Send + Sync {
    fn load(&self, reference: &str) -> anyhow::Result<Vec<PlaybookEntry>>;
}

/// Reads `offset,power` CSV, either from a `.csv` file or inline text
#[derive(Debug, Clone, Default)]
pub struct CsvPlaybookLoader {
    base_dir: Option<PathBuf>,
}

impl CsvPlaybookLoader {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }
}

impl PlaybookLoader for CsvPlaybookLoader {
    fn load(&self, reference: &str) -> anyhow::Result<Vec<PlaybookEntry>> {
        if !reference.trim_end().ends_with(".csv") {
            return parse_playbook_csv(reference);
        }

        let path = match &self.base_dir {
            Some(dir) => dir.join(reference.trim()),
            None => PathBuf::from(reference.trim()),
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read playbook file: {:?}", path))?;
        parse_playbook_csv(&text).with_context(|| format!("Invalid playbook file: {:?}", path))
    }
}

/// Parse `offset_seconds,power` rows separated by newlines or `;`.
///
/// Blank lines, `#` comments and a leading header row are skipped.
/// Entries are ordered by offset.
pub fn parse_playbook_csv(text: &str) -> anyhow::Result<Vec<PlaybookEntry>> {
    let mut entries = Vec::new();

    for (idx, line) in text.split(['\n', ';']).enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if entries.is_empty() && line.starts_with(|c: char| c.is_ascii_alphabetic()) {
            continue;
        }

        let Some((offset, power)) = line.split_once(',') else {
            bail!("row {} must be 'offset,power': '{}'", idx + 1, line);
        };
        let offset: f64 = offset
            .trim()
            .parse()
            .with_context(|| format!("row {}: offset '{}' is not a number", idx + 1, offset.trim()))?;
        let power: f64 = power
            .trim()
            .parse()
            .with_context(|| format!("row {}: power '{}' is not a number", idx + 1, power.trim()))?;
        if !offset.is_finite() || offset < 0.0 {
            bail!("row {}: offset must be a non-negative number of seconds", idx + 1);
        }
        let offset = Duration::try_from_secs_f64(offset)
            .with_context(|| format!("row {}: offset {} is out of range", idx + 1, offset))?;

        entries.push(PlaybookEntry { offset, power });
    }

    if entries.is_empty() {
        bail!("playbook has no entries");
    }
    entries.sort_by_key(|entry| entry.offset);
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq)]
enum Playback {
    Idle,
    Playing {
        playbook_id: String,
        started_at: DateTime<Utc>,
        next_index: usize,
        timer: TimerId,
        /// Started by a state trigger, stopped when the entity leaves that state
        triggered: bool,
    },
}

/// Replays recorded power curves on a timer.
///
/// At most one playbook plays at a time and at most one timer is pending.
pub struct PlaybookStrategy {
    owner: String,
    config: PlaybookConfig,
    loader: Arc<dyn PlaybookLoader>,
    scheduler: Arc<dyn Scheduler>,
    loaded: HashMap<String, Arc<Vec<PlaybookEntry>>>,
    playback: Playback,
    power: f64,
    autostarted: bool,
}

impl PlaybookStrategy {
    pub fn new(
        owner: &str,
        config: PlaybookConfig,
        loader: Arc<dyn PlaybookLoader>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        check_config(&config)?;
        Ok(Self {
            owner: owner.to_string(),
            config,
            loader,
            scheduler,
            loaded: HashMap::new(),
            playback: Playback::Idle,
            power: 0.0,
            autostarted: false,
        })
    }

    /// Parsed entries of a playbook, loaded on first use
    fn entries(&mut self, playbook_id: &str) -> Result<Arc<Vec<PlaybookEntry>>> {
        if let Some(entries) = self.loaded.get(playbook_id) {
            return Ok(Arc::clone(entries));
        }

        let reference = self.config.playbooks.get(playbook_id).ok_or_else(|| {
            PowercalcError::StrategyConfiguration(format!("playbook '{}' is not defined", playbook_id))
        })?;
        let entries = self.loader.load(reference).map_err(|e| {
            PowercalcError::StrategyConfiguration(format!(
                "playbook '{}' could not be loaded: {:#}",
                playbook_id, e
            ))
        })?;
        if entries.is_empty() {
            return Err(PowercalcError::StrategyConfiguration(format!(
                "playbook '{}' has no entries",
                playbook_id
            )));
        }

        debug!(owner = %self.owner, playbook = %playbook_id, entries = entries.len(), "Playbook loaded");
        let entries = Arc::new(entries);
        self.loaded.insert(playbook_id.to_string(), Arc::clone(&entries));
        Ok(entries)
    }

    fn schedule(&self, started_at: DateTime<Utc>, entry: &PlaybookEntry) -> TimerId {
        let due = started_at
            .checked_add_signed(to_chrono(entry.offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let delay = (due - self.scheduler.now()).to_std().unwrap_or(Duration::ZERO);
        self.scheduler.schedule_once(&self.owner, delay)
    }

    fn cancel_pending(&mut self) {
        if let Playback::Playing { timer, .. } = &self.playback {
            self.scheduler.cancel(*timer);
        }
        self.playback = Playback::Idle;
    }

    fn start(&mut self, playbook_id: &str, triggered: bool) -> Result<()> {
        let entries = self.entries(playbook_id)?;
        self.cancel_pending();

        let started_at = self.scheduler.now();
        let timer = self.schedule(started_at, &entries[0]);
        self.playback = Playback::Playing {
            playbook_id: playbook_id.to_string(),
            started_at,
            next_index: 0,
            timer,
            triggered,
        };

        info!(owner = %self.owner, playbook = %playbook_id, "Playbook activated");
        Ok(())
    }

    /// Start a playbook, replacing any playbook currently playing
    pub fn activate_playbook(&mut self, playbook_id: &str) -> Result<()> {
        self.start(playbook_id, false)
    }

    /// Cancel the pending timer; the last emitted power is kept
    pub fn stop_playbook(&mut self) {
        if let Playback::Playing { playbook_id, .. } = &self.playback {
            info!(owner = %self.owner, playbook = %playbook_id, "Playbook stopped");
        }
        self.cancel_pending();
    }

    pub fn active_playbook(&self) -> Option<&str> {
        match &self.playback {
            Playback::Playing { playbook_id, .. } => Some(playbook_id),
            Playback::Idle => None,
        }
    }

    pub fn power(&self) -> f64 {
        self.power
    }
}

fn check_config(config: &PlaybookConfig) -> Result<()> {
    if config.playbooks.is_empty() {
        return Err(PowercalcError::StrategyConfiguration(
            "playbook strategy needs at least one playbook".to_string(),
        ));
    }

    let referenced = config.autostart.iter().chain(config.states_trigger.values());
    for id in referenced {
        if !config.playbooks.contains_key(id) {
            return Err(PowercalcError::StrategyConfiguration(format!(
                "playbook '{}' is referenced but not defined",
                id
            )));
        }
    }
    Ok(())
}

impl PowerCalculationStrategy for PlaybookStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Playbook
    }

    fn calculate(&mut self, state: &EntityState, _ctx: &CalculationContext<'_>) -> Option<f64> {
        if !self.autostarted {
            self.autostarted = true;
            if let Some(id) = self.config.autostart.clone() {
                if let Err(e) = self.activate_playbook(&id) {
                    warn!(owner = %self.owner, error = %e, "Autostart playbook failed");
                }
            }
        }

        match self.config.states_trigger.get(&state.state).cloned() {
            Some(id) if self.active_playbook() != Some(id.as_str()) => {
                if let Err(e) = self.start(&id, true) {
                    warn!(owner = %self.owner, state = %state.state, error = %e, "Triggered playbook failed");
                }
            }
            Some(_) => {}
            None => {
                if matches!(self.playback, Playback::Playing { triggered: true, .. }) {
                    self.stop_playbook();
                }
            }
        }

        Some(self.power)
    }

    fn validate(&self, _source: &MonitoredEntity) -> Result<()> {
        check_config(&self.config)
    }

    fn can_calculate_standby(&self) -> bool {
        true
    }

    fn on_timer(&mut self, fired: &TimerFired, _ctx: &CalculationContext<'_>) -> Option<f64> {
        let Playback::Playing {
            playbook_id,
            started_at,
            next_index,
            timer,
            triggered,
        } = self.playback.clone()
        else {
            return None;
        };
        if timer != fired.id {
            debug!(owner = %self.owner, timer = %fired.id, "Ignoring stale playbook timer");
            return None;
        }

        let entries = Arc::clone(self.loaded.get(&playbook_id)?);
        let entry = entries.get(next_index)?;
        self.power = entry.power;

        let next_index = next_index + 1;
        if let Some(next) = entries.get(next_index) {
            let timer = self.schedule(started_at, next);
            self.playback = Playback::Playing {
                playbook_id,
                started_at,
                next_index,
                timer,
                triggered,
            };
        } else if self.config.repeat {
            let started_at = self.scheduler.now();
            let timer = self.schedule(started_at, &entries[0]);
            debug!(owner = %self.owner, playbook = %playbook_id, "Playbook repeating");
            self.playback = Playback::Playing {
                playbook_id,
                started_at,
                next_index: 0,
                timer,
                triggered,
            };
        } else {
            info!(owner = %self.owner, playbook = %playbook_id, "Playbook completed");
            self.playback = Playback::Idle;
        }

        Some(self.power)
    }

    fn playbook_mut(&mut self) -> Option<&mut PlaybookStrategy> {
        Some(self)
    }
}

impl Drop for PlaybookStrategy {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
