use crate::error::{PowercalcError, Result};
use crate::sensor::SensorKind;
use serde::{Deserialize, Serialize};

/// Domain value matching every source domain
pub const DOMAIN_ALL: &str = "all";

/// How a group finds its members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupTopology {
    Custom {
        members: Vec<String>,
    },
    /// Every virtual sensor of the group's kind whose source has this domain
    Domain {
        domain: String,
    },
    Subtract {
        base: String,
        #[serde(default)]
        subtract: Vec<String>,
    },
    TrackedUntracked {
        /// Main meter the untracked remainder is derived from
        #[serde(default)]
        main: Option<String>,
        /// `None` tracks every virtual power sensor
        #[serde(default)]
        tracked: Option<Vec<String>>,
        #[serde(default)]
        untracked_id: Option<String>,
        #[serde(default)]
        untracked_energy: Option<UntrackedEnergyConfig>,
    },
}

/// Energy sensor integrating untracked power while it stays above a threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntrackedEnergyConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub min_dwell_seconds: u64,
}

/// One `[[groups]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    pub kind: SensorKind,
    pub topology: GroupTopology,
    /// Unavailable members count as zero instead of being left out
    #[serde(default)]
    pub ignore_unavailable: bool,
    /// First sighting of an energy member contributes nothing
    #[serde(default)]
    pub start_at_zero: bool,
    #[serde(default)]
    pub precision: Option<u32>,
    /// Defaults to W for power groups and kWh for energy groups
    #[serde(default)]
    pub unit: Option<String>,
}

impl GroupConfig {
    pub fn new(id: &str, kind: SensorKind, topology: GroupTopology) -> Self {
        Self {
            id: id.to_string(),
            kind,
            topology,
            ignore_unavailable: false,
            start_at_zero: false,
            precision: None,
            unit: None,
        }
    }

    pub fn unit(&self) -> &str {
        self.unit.as_deref().unwrap_or(self.kind.default_unit())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub sensor_id: String,
    pub kind: SensorKind,
    /// Domain of the entity the sensor estimates
    pub source_domain: String,
}

/// Virtual sensors known to the session, used to resolve domain and auto-tracked groups
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    entries: Vec<CatalogEntry>,
}

impl SensorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sensor_id: &str, kind: SensorKind, source_domain: &str) {
        self.entries.push(CatalogEntry {
            sensor_id: sensor_id.to_string(),
            kind,
            source_domain: source_domain.to_string(),
        });
    }

    fn ids(&self, kind: SensorKind, domain: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind && (domain == DOMAIN_ALL || e.source_domain == domain))
            .map(|e| e.sensor_id.clone())
            .collect()
    }
}

/// A topology flattened to concrete member ids
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedTopology {
    Sum(Vec<String>),
    Subtract {
        base: String,
        subtract: Vec<String>,
    },
    TrackedUntracked {
        main: Option<String>,
        tracked: Vec<String>,
        untracked_id: Option<String>,
        untracked_energy: Option<UntrackedEnergyConfig>,
    },
}

impl ResolvedTopology {
    /// Every entity id whose change affects the group
    pub fn members(&self) -> Vec<String> {
        match self {
            ResolvedTopology::Sum(members) => members.clone(),
            ResolvedTopology::Subtract { base, subtract } => {
                std::iter::once(base.clone()).chain(subtract.iter().cloned()).collect()
            }
            ResolvedTopology::TrackedUntracked { main, tracked, .. } => {
                main.iter().cloned().chain(tracked.iter().cloned()).collect()
            }
        }
    }
}

impl GroupConfig {
    /// Validate and flatten the topology
    pub fn resolve(&self, catalog: &SensorCatalog) -> Result<ResolvedTopology> {
        let invalid = |msg: String| PowercalcError::SensorConfiguration(format!("group {}: {}", self.id, msg));

        if self.kind.unit_factor(self.unit()).is_none() {
            return Err(invalid(format!("unit '{}' is not a {:?} unit", self.unit(), self.kind)));
        }

        let resolved = match &self.topology {
            GroupTopology::Custom { members } => {
                if members.is_empty() {
                    return Err(invalid("custom group has no members".to_string()));
                }
                ResolvedTopology::Sum(members.clone())
            }
            GroupTopology::Domain { domain } => {
                let members: Vec<String> = catalog
                    .ids(self.kind, domain)
                    .into_iter()
                    .filter(|id| id != &self.id)
                    .collect();
                if members.is_empty() {
                    return Err(invalid(format!("no sensors found for domain '{}'", domain)));
                }
                ResolvedTopology::Sum(members)
            }
            GroupTopology::Subtract { base, subtract } => {
                if base.is_empty() {
                    return Err(invalid("subtract group needs a base entity".to_string()));
                }
                ResolvedTopology::Subtract {
                    base: base.clone(),
                    subtract: subtract.clone(),
                }
            }
            GroupTopology::TrackedUntracked {
                main,
                tracked,
                untracked_id,
                untracked_energy,
            } => {
                if self.kind != SensorKind::Power {
                    return Err(invalid("tracked/untracked groups must be power groups".to_string()));
                }
                if main.is_none() && (untracked_id.is_some() || untracked_energy.is_some()) {
                    return Err(invalid("untracked sensors need a main power entity".to_string()));
                }

                let candidates = match tracked {
                    Some(list) => list.clone(),
                    None => catalog.ids(SensorKind::Power, DOMAIN_ALL),
                };
                let tracked: Vec<String> = candidates
                    .into_iter()
                    .filter(|id| Some(id) != main.as_ref() && id != &self.id)
                    .collect();

                let untracked_id = main
                    .as_ref()
                    .map(|_| untracked_id.clone().unwrap_or_else(|| format!("{}_untracked", self.id)));

                ResolvedTopology::TrackedUntracked {
                    main: main.clone(),
                    tracked,
                    untracked_id,
                    untracked_energy: untracked_energy.clone(),
                }
            }
        };

        if resolved.members().iter().any(|m| m == &self.id) {
            return Err(invalid("group cannot contain itself".to_string()));
        }
        Ok(resolved)
    }
}
