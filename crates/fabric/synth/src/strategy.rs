use fabric_types::{EntityRecord, MetricCatalog, MetricRange, MetricSpec, MetricViolation, Metrics};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why metrics are being synthesized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisPhase {
    /// First synthesis for a newly registered record: draw from the nominal band
    Fresh,
    /// The record was amplified: drift the previous values, re-clamp to bounds
    Amplified,
}

impl std::fmt::Display for SynthesisPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisPhase::Fresh => write!(f, "fresh"),
            SynthesisPhase::Amplified => write!(f, "amplified"),
        }
    }
}

/// Faults raised by a synthesis strategy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("strategy {strategy} failed: {reason}")]
    Failed { strategy: String, reason: String },

    #[error("strategy {strategy} panicked: {message}")]
    Panicked { strategy: String, message: String },

    #[error("strategy {strategy} produced invalid metrics: {violation}")]
    Invalid {
        strategy: String,
        violation: MetricViolation,
    },
}

/// Metric synthesis strategy.
///
/// Implementations must return exactly the catalog's metrics, each inside its
/// declared bounds. Output that does not is treated as a fault.
pub trait Synthesizer: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    fn synthesize(
        &self,
        record: &EntityRecord,
        phase: SynthesisPhase,
        catalog: &MetricCatalog,
    ) -> Result<Metrics, SynthesisError>;
}

/// Multiply `value` by `factor` and clamp the result into `bounds`.
pub fn perturb(value: f64, factor: f64, bounds: &MetricRange) -> f64 {
    bounds.clamp(value * factor)
}

/// Previous value of a metric, or the nominal midpoint when it is missing or
/// unusable (e.g. the catalog gained a metric since the last update).
pub(crate) fn previous_value(record: &EntityRecord, spec: &MetricSpec) -> f64 {
    match record.metrics.get(&spec.name) {
        Some(v) if spec.bounds.contains(*v) => *v,
        _ => spec.nominal.midpoint(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perturb_reclamps() {
        let unit = MetricRange::UNIT;
        assert_eq!(perturb(0.98, 1.1, &unit), 1.0);
        assert_eq!(perturb(0.5, 0.9, &unit), 0.45);
        assert_eq!(perturb(f64::NAN, 1.0, &unit), 0.5);
    }
}
