use fabric_types::{EntityRecord, MetricCatalog, Metrics};

use crate::strategy::{perturb, previous_value, SynthesisError, SynthesisPhase, Synthesizer};

/// Deterministic strategy for tests and reproducible runs.
///
/// Fresh metrics sit at `position` across each nominal band (0 = low edge,
/// 1 = high edge). Amplification multiplies by `drift_factor` and re-clamps.
#[derive(Clone, Debug)]
pub struct DeterministicSynthesizer {
    position: f64,
    drift_factor: f64,
}

impl DeterministicSynthesizer {
    pub fn new(position: f64, drift_factor: f64) -> Self {
        Self {
            position,
            drift_factor,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn drift_factor(&self) -> f64 {
        self.drift_factor
    }
}

impl Default for DeterministicSynthesizer {
    /// Top of the nominal band, 5% decay per amplification.
    fn default() -> Self {
        Self::new(1.0, 0.95)
    }
}

impl Synthesizer for DeterministicSynthesizer {
    fn name(&self) -> &str {
        "deterministic"
    }

    fn synthesize(
        &self,
        record: &EntityRecord,
        phase: SynthesisPhase,
        catalog: &MetricCatalog,
    ) -> Result<Metrics, SynthesisError> {
        Ok(catalog
            .iter()
            .map(|spec| {
                let value = match phase {
                    SynthesisPhase::Fresh => spec.nominal.lerp(self.position),
                    SynthesisPhase::Amplified => perturb(
                        previous_value(record, spec),
                        self.drift_factor,
                        &spec.bounds,
                    ),
                };
                (spec.name.clone(), value)
            })
            .collect())
    }
}
