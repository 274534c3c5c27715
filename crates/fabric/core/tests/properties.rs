//! Property tests for reads, metric bounds and recovery.

use std::sync::Arc;

use fabric_core::{
    BoundedRandomSynthesizer, DeterministicSynthesizer, Fabric, MemorySink, Operation,
};
use proptest::prelude::*;
use serde_json::json;

fn seeded_fabric(seed: u64, drift: f64) -> Fabric {
    Fabric::builder()
        .synthesizer(Arc::new(BoundedRandomSynthesizer::seeded(seed, drift)))
        .sink(Arc::new(MemorySink::new()))
        .build()
        .unwrap()
}

#[test]
fn repeated_reads_are_byte_identical() {
    let fabric = Fabric::builder()
        .synthesizer(Arc::new(DeterministicSynthesizer::default()))
        .sink(Arc::new(MemorySink::new()))
        .build()
        .unwrap();
    fabric
        .register("a1", json!({"x": 1, "nested": {"b": [1, 2], "a": null}}), "primary")
        .unwrap();

    let first = serde_json::to_vec(&fabric.get_state("a1").unwrap()).unwrap();
    for _ in 0..5 {
        let again = serde_json::to_vec(&fabric.get_state("a1").unwrap()).unwrap();
        assert_eq!(first, again);
    }
}

#[derive(Debug, Clone)]
enum Step {
    Amplify(i64),
    Recover,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => any::<i64>().prop_map(Step::Amplify),
        1 => Just(Step::Recover),
    ]
}

proptest! {
    #[test]
    fn metrics_stay_within_bounds(
        seed in any::<u64>(),
        drift in 0.0f64..0.5,
        steps in prop::collection::vec(step(), 1..40),
    ) {
        let fabric = seeded_fabric(seed, drift);
        let record = fabric.register("a1", json!({"x": 0}), "primary").unwrap();
        for spec in fabric.catalog().iter() {
            prop_assert!(spec.nominal.contains(record.metrics[&spec.name]));
        }

        for step in steps {
            let record = match step {
                Step::Amplify(x) => fabric.amplify("a1", json!({"x": x}), "primary"),
                Step::Recover => fabric.recover("a1", Operation::Amplify),
            }
            .unwrap();

            prop_assert!(fabric.catalog().within_bounds(&record.metrics));
            prop_assert!(record.updated_at >= record.created_at);
        }
    }

    #[test]
    fn amplify_drift_is_bounded(seed in any::<u64>(), drift in 0.0f64..0.5) {
        let fabric = seeded_fabric(seed, drift);
        let before = fabric.register("a1", json!({"x": 1}), "primary").unwrap();
        let after = fabric.amplify("a1", json!({"x": 2}), "secondary").unwrap();

        for spec in fabric.catalog().iter() {
            let old = before.metrics[&spec.name];
            let new = after.metrics[&spec.name];
            let lo = spec.bounds.clamp(old * (1.0 - drift));
            let hi = spec.bounds.clamp(old * (1.0 + drift));
            prop_assert!(new >= lo - 1e-12 && new <= hi + 1e-12,
                "{} moved from {} to {} with drift {}", spec.name, old, new, drift);
        }
    }

    #[test]
    fn recovery_converges_immediately(seed in any::<u64>(), amplifies in 0usize..10) {
        let fabric = seeded_fabric(seed, 0.1);
        fabric.register("a1", json!({}), "").unwrap();
        for i in 0..amplifies {
            fabric.amplify("a1", json!({"i": i}), "").unwrap();
        }

        let first = fabric.recover("a1", Operation::Broadcast).unwrap();
        let second = fabric.recover("a1", Operation::Broadcast).unwrap();
        prop_assert_eq!(&first.metrics, &second.metrics);
        prop_assert!(second.is_degraded());
        for spec in fabric.catalog().iter() {
            prop_assert!(spec.degraded.contains(second.metrics[&spec.name]));
        }
    }
}
