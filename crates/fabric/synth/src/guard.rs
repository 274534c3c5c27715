use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use fabric_types::{EntityRecord, MetricCatalog, Metrics};
use tracing::warn;

use crate::strategy::{SynthesisError, SynthesisPhase, Synthesizer};

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a strategy and check its output against the catalog.
///
/// Panics, strategy errors and metrics that violate the catalog all come
/// back as `Err`.
pub fn synthesize_guarded(
    strategy: &dyn Synthesizer,
    record: &EntityRecord,
    phase: SynthesisPhase,
    catalog: &MetricCatalog,
) -> Result<Metrics, SynthesisError> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        strategy.synthesize(record, phase, catalog)
    }));

    let metrics = match outcome {
        Ok(result) => result?,
        Err(payload) => {
            let message = panic_message(payload);
            warn!(
                strategy = strategy.name(),
                entity_id = %record.id,
                %phase,
                message = %message,
                "Synthesis strategy panicked"
            );
            return Err(SynthesisError::Panicked {
                strategy: strategy.name().to_string(),
                message,
            });
        }
    };

    catalog
        .check(&metrics)
        .map_err(|violation| SynthesisError::Invalid {
            strategy: strategy.name().to_string(),
            violation,
        })?;

    Ok(metrics)
}
