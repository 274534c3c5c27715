//! Metric catalog: declared names, bounds and sub-bands.
//!
//! Every metric has three nested closed intervals:
//!
//! - `bounds`: the documented valid range; no stored value ever leaves it
//! - `nominal`: where fresh registrations draw from
//! - `degraded`: strictly inside `nominal`, used by recovery to signal
//!   reduced confidence without violating the bounds

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{FabricError, FabricResult};

/// Metric values keyed by metric name. Ordered so serialization is stable.
pub type Metrics = BTreeMap<String, f64>;

/// A closed interval `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub min: f64,
    pub max: f64,
}

impl MetricRange {
    pub const UNIT: MetricRange = MetricRange { min: 0.0, max: 1.0 };

    pub fn new(min: f64, max: f64) -> FabricResult<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(FabricError::InvalidCatalog(format!(
                "range [{}, {}] is not finite",
                min, max
            )));
        }
        if min > max {
            return Err(FabricError::InvalidCatalog(format!(
                "range [{}, {}] is inverted",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// Clamp into the range. Non-finite input maps to the midpoint.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_finite() {
            value.clamp(self.min, self.max)
        } else {
            self.midpoint()
        }
    }

    pub fn midpoint(&self) -> f64 {
        self.min + (self.max - self.min) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Point at relative position `t` (clamped to `[0, 1]`) across the range.
    pub fn lerp(&self, t: f64) -> f64 {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
        self.clamp(self.min + self.width() * t)
    }

    pub fn encloses(&self, other: &MetricRange) -> bool {
        other.min >= self.min && other.max <= self.max
    }

    /// `other` lies inside this range without touching either edge.
    pub fn strictly_encloses(&self, other: &MetricRange) -> bool {
        other.min > self.min && other.max < self.max
    }
}

impl std::fmt::Display for MetricRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Declaration of one synthesized metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(default = "default_bounds")]
    pub bounds: MetricRange,
    #[serde(default = "default_nominal")]
    pub nominal: MetricRange,
    #[serde(default = "default_degraded")]
    pub degraded: MetricRange,
}

fn default_bounds() -> MetricRange {
    MetricRange::UNIT
}

fn default_nominal() -> MetricRange {
    MetricRange {
        min: 0.85,
        max: 1.0,
    }
}

fn default_degraded() -> MetricRange {
    MetricRange {
        min: 0.86,
        max: 0.90,
    }
}

impl MetricSpec {
    /// A metric on `[0, 1]` with the default nominal and degraded bands.
    pub fn unit(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bounds: default_bounds(),
            nominal: default_nominal(),
            degraded: default_degraded(),
        }
    }

    pub fn validate(&self) -> FabricResult<()> {
        if self.name.trim().is_empty() {
            return Err(FabricError::InvalidCatalog("metric name is empty".into()));
        }
        for range in [&self.bounds, &self.nominal, &self.degraded] {
            MetricRange::new(range.min, range.max)?;
        }
        if !self.bounds.encloses(&self.nominal) {
            return Err(FabricError::InvalidCatalog(format!(
                "{}: nominal {} escapes bounds {}",
                self.name, self.nominal, self.bounds
            )));
        }
        if !self.nominal.strictly_encloses(&self.degraded) {
            return Err(FabricError::InvalidCatalog(format!(
                "{}: degraded {} must lie strictly inside nominal {}",
                self.name, self.degraded, self.nominal
            )));
        }
        Ok(())
    }
}

/// A single metric that failed catalog checks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricViolation {
    #[error("metric {0} is missing")]
    Missing(String),

    #[error("metric {0} is not declared in the catalog")]
    Undeclared(String),

    #[error("metric {name} is not finite ({value})")]
    NonFinite { name: String, value: f64 },

    #[error("metric {name} = {value} outside bounds {bounds}")]
    OutOfBounds {
        name: String,
        value: f64,
        bounds: MetricRange,
    },
}

/// Ordered set of metric declarations a fabric synthesizes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<MetricSpec>", into = "Vec<MetricSpec>")]
pub struct MetricCatalog {
    specs: Vec<MetricSpec>,
}

impl MetricCatalog {
    pub fn new(specs: Vec<MetricSpec>) -> FabricResult<Self> {
        if specs.is_empty() {
            return Err(FabricError::InvalidCatalog(
                "catalog must declare at least one metric".into(),
            ));
        }
        let mut seen = HashSet::new();
        for spec in &specs {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(FabricError::InvalidCatalog(format!(
                    "metric {} declared twice",
                    spec.name
                )));
            }
        }
        Ok(Self { specs })
    }

    pub fn get(&self, name: &str) -> Option<&MetricSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSpec> {
        self.specs.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Check a metric set against the catalog: exactly the declared names,
    /// every value finite and inside its bounds.
    pub fn check(&self, metrics: &Metrics) -> Result<(), MetricViolation> {
        for spec in &self.specs {
            let value = *metrics
                .get(&spec.name)
                .ok_or_else(|| MetricViolation::Missing(spec.name.clone()))?;
            if !value.is_finite() {
                return Err(MetricViolation::NonFinite {
                    name: spec.name.clone(),
                    value,
                });
            }
            if !spec.bounds.contains(value) {
                return Err(MetricViolation::OutOfBounds {
                    name: spec.name.clone(),
                    value,
                    bounds: spec.bounds,
                });
            }
        }
        if let Some(extra) = metrics.keys().find(|k| self.get(k).is_none()) {
            return Err(MetricViolation::Undeclared(extra.clone()));
        }
        Ok(())
    }

    pub fn within_bounds(&self, metrics: &Metrics) -> bool {
        self.check(metrics).is_ok()
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self {
            specs: vec![
                MetricSpec::unit("coherence"),
                MetricSpec::unit("stability"),
                MetricSpec::unit("resonance"),
            ],
        }
    }
}

impl TryFrom<Vec<MetricSpec>> for MetricCatalog {
    type Error = FabricError;

    fn try_from(specs: Vec<MetricSpec>) -> FabricResult<Self> {
        Self::new(specs)
    }
}

impl From<MetricCatalog> for Vec<MetricSpec> {
    fn from(catalog: MetricCatalog) -> Self {
        catalog.specs
    }
}
