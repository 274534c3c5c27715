use fabric_types::{EntityRecord, MetricCatalog, Metrics};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::strategy::{perturb, previous_value, SynthesisError, SynthesisPhase, Synthesizer};

/// Default relative drift applied on amplification (±10%).
pub const DEFAULT_MAX_DRIFT: f64 = 0.10;

/// Production strategy: bounded randomness.
///
/// Fresh metrics are drawn uniformly from each metric's nominal band.
/// Amplified metrics are multiplied by a factor drawn from
/// `[1 - max_drift, 1 + max_drift]` and re-clamped into the full bounds.
pub struct BoundedRandomSynthesizer {
    rng: Mutex<StdRng>,
    max_drift: f64,
}

impl BoundedRandomSynthesizer {
    /// Entropy-seeded generator.
    pub fn new(max_drift: f64) -> Self {
        Self::from_rng(StdRng::from_entropy(), max_drift)
    }

    /// Reproducible generator.
    pub fn seeded(seed: u64, max_drift: f64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed), max_drift)
    }

    fn from_rng(rng: StdRng, max_drift: f64) -> Self {
        let max_drift = if max_drift.is_finite() {
            max_drift.clamp(0.0, 0.5)
        } else {
            DEFAULT_MAX_DRIFT
        };
        Self {
            rng: Mutex::new(rng),
            max_drift,
        }
    }

    pub fn max_drift(&self) -> f64 {
        self.max_drift
    }
}

impl Default for BoundedRandomSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DRIFT)
    }
}

impl Synthesizer for BoundedRandomSynthesizer {
    fn name(&self) -> &str {
        "bounded-random"
    }

    fn synthesize(
        &self,
        record: &EntityRecord,
        phase: SynthesisPhase,
        catalog: &MetricCatalog,
    ) -> Result<Metrics, SynthesisError> {
        let mut rng = self.rng.lock();
        let metrics = catalog
            .iter()
            .map(|spec| {
                let value = match phase {
                    SynthesisPhase::Fresh => rng.gen_range(spec.nominal.min..=spec.nominal.max),
                    SynthesisPhase::Amplified => {
                        let factor = 1.0 + rng.gen_range(-self.max_drift..=self.max_drift);
                        perturb(previous_value(record, spec), factor, &spec.bounds)
                    }
                };
                (spec.name.clone(), value)
            })
            .collect();
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_types::{EntityId, EntityKind, Timestamp};
    use proptest::prelude::*;
    use serde_json::json;

    fn record() -> EntityRecord {
        EntityRecord::new(
            EntityId::parse("a1").unwrap(),
            EntityKind::parse("core").unwrap(),
            json!({"x": 1}).as_object().cloned().unwrap(),
            "primary",
            Timestamp {
                physical: 1,
                logical: 0,
            },
        )
    }

    #[test]
    fn fresh_metrics_are_nominal() {
        let synth = BoundedRandomSynthesizer::seeded(7, DEFAULT_MAX_DRIFT);
        let catalog = MetricCatalog::default();
        for _ in 0..200 {
            let m = synth
                .synthesize(&record(), SynthesisPhase::Fresh, &catalog)
                .unwrap();
            for spec in catalog.iter() {
                assert!(spec.nominal.contains(m[&spec.name]));
            }
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let catalog = MetricCatalog::default();
        let a = BoundedRandomSynthesizer::seeded(42, 0.05);
        let b = BoundedRandomSynthesizer::seeded(42, 0.05);
        for _ in 0..10 {
            assert_eq!(
                a.synthesize(&record(), SynthesisPhase::Fresh, &catalog).unwrap(),
                b.synthesize(&record(), SynthesisPhase::Fresh, &catalog).unwrap()
            );
        }
    }

    #[test]
    fn drift_is_sanitized() {
        assert_eq!(BoundedRandomSynthesizer::seeded(1, f64::NAN).max_drift(), DEFAULT_MAX_DRIFT);
        assert_eq!(BoundedRandomSynthesizer::seeded(1, 3.0).max_drift(), 0.5);
        assert_eq!(BoundedRandomSynthesizer::seeded(1, -1.0).max_drift(), 0.0);
    }

    proptest! {
        #[test]
        fn repeated_amplification_stays_bounded(seed in any::<u64>(), rounds in 1usize..60, drift in 0.0f64..0.5) {
            let synth = BoundedRandomSynthesizer::seeded(seed, drift);
            let catalog = MetricCatalog::default();
            let mut r = record();
            r.metrics = synth.synthesize(&r, SynthesisPhase::Fresh, &catalog).unwrap();
            for _ in 0..rounds {
                let prev = r.metrics.clone();
                r.metrics = synth.synthesize(&r, SynthesisPhase::Amplified, &catalog).unwrap();
                prop_assert!(catalog.within_bounds(&r.metrics));
                for (name, value) in &r.metrics {
                    let before = prev[name];
                    prop_assert!((value - before).abs() <= before * drift + 1e-12);
                }
            }
        }
    }
}
