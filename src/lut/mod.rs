// Lookup tables mapping light settings to measured power

use crate::calibration::interpolate_between;
use crate::entity::ColorMode;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

mod registry;

pub use registry::{
    DirectoryLutSource, LutKey, LutPayload, LutRegistry, LutSource, StaticLutSource,
};


pub const MAX_BRIGHTNESS: u32 = 255;

/// Table dimension layout; several light color modes share one layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LutMode {
    /// brightness -> power
    Brightness,
    /// brightness -> mired -> power
    ColorTemp,
    /// brightness -> hue -> saturation -> power
    Hs,
}

impl LutMode {
    /// Layout used for a light color mode; xy/rgb variants are looked up as hue/saturation
    pub fn for_color_mode(mode: ColorMode) -> Option<Self> {
        match mode {
            ColorMode::Onoff | ColorMode::Brightness | ColorMode::White => Some(LutMode::Brightness),
            ColorMode::ColorTemp => Some(LutMode::ColorTemp),
            ColorMode::Hs | ColorMode::Xy | ColorMode::Rgb | ColorMode::Rgbw | ColorMode::Rgbww => {
                Some(LutMode::Hs)
            }
            ColorMode::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LutMode::Brightness => "brightness",
            LutMode::ColorTemp => "color_temp",
            LutMode::Hs => "hs",
        }
    }
}

impl fmt::Display for LutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One measured row: brightness, optional mired or hue, optional saturation, power
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LutRow {
    pub brightness: u32,
    pub secondary: Option<u32>,
    pub tertiary: Option<u32>,
    pub power: f64,
}

impl LutRow {
    pub fn brightness(brightness: u32, power: f64) -> Self {
        Self {
            brightness,
            secondary: None,
            tertiary: None,
            power,
        }
    }

    pub fn color_temp(brightness: u32, mired: u32, power: f64) -> Self {
        Self {
            brightness,
            secondary: Some(mired),
            tertiary: None,
            power,
        }
    }

    pub fn hs(brightness: u32, hue: u32, saturation: u32, power: f64) -> Self {
        Self {
            brightness,
            secondary: Some(hue),
            tertiary: Some(saturation),
            power,
        }
    }
}

/// Light state translated into table coordinates.
///
/// Hue is in the table's 16-bit domain (0..=65535), saturation in its 8-bit
/// domain (0..=255), color temperature in mired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSetting {
    pub mode: LutMode,
    pub brightness: u32,
    pub color_temp: Option<u32>,
    pub hue: Option<u32>,
    pub saturation: Option<u32>,
}

/// Hue in degrees (0..360) to the 16-bit table domain
pub fn normalize_hue(degrees: f64) -> u32 {
    ((degrees.clamp(0.0, 360.0) / 360.0) * 65535.0) as u32
}

/// Saturation in percent (0..100) to the 8-bit table domain
pub fn normalize_saturation(percent: f64) -> u32 {
    ((percent.clamp(0.0, 100.0) / 100.0) * 255.0) as u32
}

/// Nested brightness-keyed table; read-only once built
#[derive(Debug, Clone, PartialEq)]
pub enum LookupTable {
    Brightness(BTreeMap<u32, f64>),
    ColorTemp(BTreeMap<u32, BTreeMap<u32, f64>>),
    Hs(BTreeMap<u32, BTreeMap<u32, BTreeMap<u32, f64>>>),
}

impl LookupTable {
    pub fn mode(&self) -> LutMode {
        match self {
            LookupTable::Brightness(_) => LutMode::Brightness,
            LookupTable::ColorTemp(_) => LutMode::ColorTemp,
            LookupTable::Hs(_) => LutMode::Hs,
        }
    }

    pub fn brightness_keys(&self) -> Vec<u32> {
        match self {
            LookupTable::Brightness(t) => t.keys().copied().collect(),
            LookupTable::ColorTemp(t) => t.keys().copied().collect(),
            LookupTable::Hs(t) => t.keys().copied().collect(),
        }
    }

    /// Power for a light setting.
    ///
    /// An exact brightness row resolves its inner dimensions by nearest key.
    /// Otherwise the neighbouring rows are resolved the same way and linearly
    /// interpolated; brightness outside the table clamps to the edge row.
    pub fn lookup(&self, setting: &LightSetting) -> Option<f64> {
        let brightness = setting.brightness.min(MAX_BRIGHTNESS);
        match self {
            LookupTable::Brightness(table) => lookup_rows(table, brightness, |power| Some(*power)),
            LookupTable::ColorTemp(table) => {
                let mired = setting.color_temp?;
                lookup_rows(table, brightness, |row| nearest(row, mired).copied())
            }
            LookupTable::Hs(table) => {
                let (hue, saturation) = (setting.hue?, setting.saturation?);
                lookup_rows(table, brightness, |row| {
                    nearest(row, hue).and_then(|sat_row| nearest(sat_row, saturation).copied())
                })
            }
        }
    }
}

fn lookup_rows<R>(
    table: &BTreeMap<u32, R>,
    brightness: u32,
    resolve: impl Fn(&R) -> Option<f64>,
) -> Option<f64> {
    if let Some(row) = table.get(&brightness) {
        return resolve(row);
    }

    let lower = table.range(..brightness).next_back();
    let upper = table.range(brightness..).next();
    match (lower, upper) {
        (Some((&lower_bri, lower_row)), Some((&upper_bri, upper_row))) => {
            let lower_power = resolve(lower_row)?;
            let upper_power = resolve(upper_row)?;
            Some(interpolate_between(
                brightness as f64,
                lower_bri as f64,
                lower_power,
                upper_bri as f64,
                upper_power,
            ))
        }
        (Some((_, row)), None) | (None, Some((_, row))) => resolve(row),
        (None, None) => None,
    }
}

/// Value at the key closest to `key`; ties go to the lower key
fn nearest<V>(map: &BTreeMap<u32, V>, key: u32) -> Option<&V> {
    if let Some(value) = map.get(&key) {
        return Some(value);
    }
    let lower = map.range(..key).next_back();
    let upper = map.range(key..).next();
    match (lower, upper) {
        (Some((&lk, lv)), Some((&uk, uv))) => {
            if key - lk <= uk - key {
                Some(lv)
            } else {
                Some(uv)
            }
        }
        (Some((_, v)), None) | (None, Some((_, v))) => Some(v),
        (None, None) => None,
    }
}

/// Builds a table one row at a time
pub struct TableBuilder {
    table: LookupTable,
    rows: usize,
}

impl TableBuilder {
    pub fn new(mode: LutMode) -> Self {
        let table = match mode {
            LutMode::Brightness => LookupTable::Brightness(BTreeMap::new()),
            LutMode::ColorTemp => LookupTable::ColorTemp(BTreeMap::new()),
            LutMode::Hs => LookupTable::Hs(BTreeMap::new()),
        };
        Self { table, rows: 0 }
    }

    pub fn push(&mut self, row: LutRow) -> Result<()> {
        if !row.power.is_finite() {
            bail!("row for brightness {} has a non-finite power", row.brightness);
        }
        match &mut self.table {
            LookupTable::Brightness(t) => {
                t.insert(row.brightness, row.power);
            }
            LookupTable::ColorTemp(t) => {
                let Some(mired) = row.secondary else {
                    bail!("color_temp row for brightness {} has no mired", row.brightness);
                };
                t.entry(row.brightness).or_default().insert(mired, row.power);
            }
            LookupTable::Hs(t) => {
                let (Some(hue), Some(sat)) = (row.secondary, row.tertiary) else {
                    bail!("hs row for brightness {} needs hue and saturation", row.brightness);
                };
                t.entry(row.brightness)
                    .or_default()
                    .entry(hue)
                    .or_default()
                    .insert(sat, row.power);
            }
        }
        self.rows += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<LookupTable> {
        if self.rows == 0 {
            bail!("lookup table has no rows");
        }
        Ok(self.table)
    }
}

impl LookupTable {
    /// Build a table in one pass over the row records
    pub fn build(mode: LutMode, rows: impl IntoIterator<Item = LutRow>) -> Result<Self> {
        let mut builder = TableBuilder::new(mode);
        for row in rows {
            builder.push(row)?;
        }
        builder.finish()
    }
}
