use crate::error::PowercalcError;
use crate::lut::{LookupTable, LutMode, LutRow, TableBuilder};
use crate::profile::PowerProfile;
use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Identifies one table: a profile (optionally a sub-profile) and a layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LutKey {
    pub manufacturer: String,
    pub model: String,
    pub sub_profile: Option<String>,
    pub mode: LutMode,
}

impl LutKey {
    pub fn new(manufacturer: &str, model: &str, sub_profile: Option<&str>, mode: LutMode) -> Self {
        Self {
            manufacturer: manufacturer.to_string(),
            model: model.to_string(),
            sub_profile: sub_profile.map(str::to_string),
            mode,
        }
    }

    pub fn for_profile(profile: &PowerProfile, mode: LutMode) -> Self {
        Self::new(profile.manufacturer(), profile.model(), profile.sub_profile(), mode)
    }

    /// Cache key: `manufacturer_model[/sub_profile]_mode`
    pub fn cache_key(&self) -> String {
        match &self.sub_profile {
            Some(sub) => format!("{}_{}/{}_{}", self.manufacturer, self.model, sub, self.mode),
            None => format!("{}_{}_{}", self.manufacturer, self.model, self.mode),
        }
    }
}

/// Table rows as handed over by the loader layer
#[derive(Debug, Clone)]
pub enum LutPayload {
    /// Already-parsed row records
    Rows(Vec<LutRow>),
    /// Gzip-compressed CSV (`bri,watt` | `bri,mired,watt` | `bri,hue,sat,watt`)
    Compressed(Vec<u8>),
}

/// Loader layer that provides table rows for a key
pub trait LutSource: Send + Sync {
    /// `Ok(None)` when no table exists for this key
    fn fetch(&self, key: &LutKey) -> Result<Option<LutPayload>>;
}

/// In-memory source keyed by [`LutKey::cache_key`]
#[derive(Default)]
pub struct StaticLutSource {
    payloads: HashMap<String, LutPayload>,
}

impl StaticLutSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: LutKey, payload: LutPayload) {
        self.payloads.insert(key.cache_key(), payload);
    }

    pub fn with(mut self, key: LutKey, payload: LutPayload) -> Self {
        self.insert(key, payload);
        self
    }
}

impl LutSource for StaticLutSource {
    fn fetch(&self, key: &LutKey) -> Result<Option<LutPayload>> {
        Ok(self.payloads.get(&key.cache_key()).cloned())
    }
}

/// Reads `{root}/{manufacturer}/{model}[/{sub_profile}]/{mode}.csv.gz`
#[derive(Debug, Clone)]
pub struct DirectoryLutSource {
    root: PathBuf,
}

impl DirectoryLutSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &LutKey) -> PathBuf {
        let mut path = self.root.join(&key.manufacturer).join(&key.model);
        if let Some(sub) = &key.sub_profile {
            path = path.join(sub);
        }
        path.join(format!("{}.csv.gz", key.mode))
    }
}

impl LutSource for DirectoryLutSource {
    fn fetch(&self, key: &LutKey) -> Result<Option<LutPayload>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read lookup table file: {:?}", path))?;
        Ok(Some(LutPayload::Compressed(bytes)))
    }
}

/// Lazily populated, never evicted table cache shared by all LUT strategies of a session
pub struct LutRegistry {
    source: Arc<dyn LutSource>,
    tables: DashMap<String, Arc<LookupTable>>,
}

impl LutRegistry {
    pub fn new(source: Arc<dyn LutSource>) -> Self {
        Self {
            source,
            tables: DashMap::new(),
        }
    }

    pub fn get_table(
        &self,
        profile: &PowerProfile,
        mode: LutMode,
    ) -> std::result::Result<Arc<LookupTable>, PowercalcError> {
        self.get_table_for_key(&LutKey::for_profile(profile, mode))
    }

    pub fn get_table_for_key(
        &self,
        key: &LutKey,
    ) -> std::result::Result<Arc<LookupTable>, PowercalcError> {
        let cache_key = key.cache_key();
        if let Some(table) = self.tables.get(&cache_key) {
            return Ok(Arc::clone(table.value()));
        }

        let not_found = || PowercalcError::LutFileNotFound {
            manufacturer: key.manufacturer.clone(),
            model: key.model.clone(),
            color_mode: key.mode.to_string(),
        };

        let payload = match self.source.fetch(key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Err(not_found()),
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Failed to fetch lookup table");
                return Err(not_found());
            }
        };

        let table = match build_table(key.mode, payload) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Failed to build lookup table");
                return Err(not_found());
            }
        };

        info!(
            key = %cache_key,
            brightness_levels = table.brightness_keys().len(),
            "Loaded lookup table"
        );

        // A concurrent first access may have inserted already; keep whichever won
        let entry = self.tables.entry(cache_key).or_insert(table);
        Ok(Arc::clone(entry.value()))
    }

    pub fn cached_count(&self) -> usize {
        self.tables.len()
    }
}

fn build_table(mode: LutMode, payload: LutPayload) -> Result<LookupTable> {
    match payload {
        LutPayload::Rows(rows) => LookupTable::build(mode, rows),
        LutPayload::Compressed(bytes) => decode_compressed(mode, &bytes),
    }
}

/// Stream a gzip CSV payload into a table without materializing the rows
fn decode_compressed(mode: LutMode, bytes: &[u8]) -> Result<LookupTable> {
    let reader = BufReader::new(GzDecoder::new(bytes));
    let mut builder = TableBuilder::new(mode);

    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("Failed to decompress lookup table")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Header row
        if idx == 0 && line.starts_with(|c: char| c.is_ascii_alphabetic()) {
            continue;
        }
        let row = parse_row(mode, line).with_context(|| format!("Invalid row on line {}", idx + 1))?;
        builder.push(row)?;
    }

    builder.finish()
}

fn parse_row(mode: LutMode, line: &str) -> Result<LutRow> {
    let columns: Vec<&str> = line.split(',').map(str::trim).collect();
    let int = |s: &str| s.parse::<u32>().with_context(|| format!("'{}' is not an integer", s));
    let power = |s: &str| s.parse::<f64>().with_context(|| format!("'{}' is not a number", s));

    match (mode, columns.as_slice()) {
        (LutMode::Brightness, [bri, watt]) => Ok(LutRow::brightness(int(bri)?, power(watt)?)),
        (LutMode::ColorTemp, [bri, mired, watt]) => {
            Ok(LutRow::color_temp(int(bri)?, int(mired)?, power(watt)?))
        }
        (LutMode::Hs, [bri, hue, sat, watt]) => {
            Ok(LutRow::hs(int(bri)?, int(hue)?, int(sat)?, power(watt)?))
        }
        _ => bail!(
            "expected {} columns for {} table, found {}",
            match mode {
                LutMode::Brightness => 2,
                LutMode::ColorTemp => 3,
                LutMode::Hs => 4,
            },
            mode,
            columns.len()
        ),
    }
}
