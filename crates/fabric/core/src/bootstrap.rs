//! Wiring a [`Fabric`] from configuration.
//!
//! Subscribers are never loaded by name at runtime. A [`SubscriberFactory`]
//! maps configured subscriber names to constructors compiled into the
//! binary; the bootstrap only looks them up.

use std::collections::HashMap;
use std::sync::Arc;

use fabric_dispatch::{NoopSubscriber, Subscriber, TracingSubscriber};
use fabric_synth::{BoundedRandomSynthesizer, DeterministicSynthesizer, Synthesizer};
use fabric_types::{FabricError, FabricResult, SubscriberName};
use tracing::info;

use crate::config::{FabricConfig, SynthesizerKind};
use crate::fabric::Fabric;
use crate::sink::{OperationSink, TracingSink};

/// Builds a subscriber for a configured name.
pub type SubscriberConstructor = fn(SubscriberName) -> Arc<dyn Subscriber>;

/// Static table from subscriber names to constructors.
///
/// Lookup tries the full dotted name, then its first segment, then the
/// fallback. `audit.log` therefore matches an `audit.log` entry before an
/// `audit` entry.
#[derive(Clone, Default)]
pub struct SubscriberFactory {
    constructors: HashMap<String, SubscriberConstructor>,
    fallback: Option<SubscriberConstructor>,
}

impl SubscriberFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `log` → [`TracingSubscriber`], `noop` → [`NoopSubscriber`].
    pub fn with_builtins() -> Self {
        Self::new()
            .register("log", |name| Arc::new(TracingSubscriber::new(name)))
            .register("noop", |name| Arc::new(NoopSubscriber::new(name)))
    }

    pub fn register(mut self, key: impl Into<String>, constructor: SubscriberConstructor) -> Self {
        self.constructors.insert(key.into(), constructor);
        self
    }

    /// Constructor for names nothing else matches.
    pub fn fallback(mut self, constructor: SubscriberConstructor) -> Self {
        self.fallback = Some(constructor);
        self
    }

    pub fn build(&self, name: &SubscriberName) -> FabricResult<Arc<dyn Subscriber>> {
        let constructor = self
            .constructors
            .get(name.as_str())
            .or_else(|| {
                name.segments()
                    .next()
                    .and_then(|head| self.constructors.get(head))
            })
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                FabricError::Config(format!("no subscriber constructor matches {}", name))
            })?;
        Ok(constructor(name.clone()))
    }
}

/// Turns a [`FabricConfig`] into a wired [`Fabric`].
pub struct Bootstrap {
    config: FabricConfig,
    factory: SubscriberFactory,
    sink: Option<Arc<dyn OperationSink>>,
}

impl Bootstrap {
    pub fn new(config: FabricConfig, factory: SubscriberFactory) -> Self {
        Self {
            config,
            factory,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn OperationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn build(self) -> FabricResult<Fabric> {
        self.config.validate()?;

        let synth = &self.config.synthesizer;
        let synthesizer: Arc<dyn Synthesizer> = match synth.strategy {
            SynthesizerKind::Random => Arc::new(match synth.seed {
                Some(seed) => BoundedRandomSynthesizer::seeded(seed, synth.max_drift),
                None => BoundedRandomSynthesizer::new(synth.max_drift),
            }),
            SynthesizerKind::Deterministic => Arc::new(DeterministicSynthesizer::default()),
        };

        let mut builder = Fabric::builder()
            .kind(self.config.default_kind.clone())
            .catalog(self.config.metrics.clone())
            .duplicate_policy(self.config.duplicate_policy)
            .dispatch_config(self.config.dispatch.clone())
            .recovery_config(self.config.recovery.clone())
            .synthesizer(synthesizer)
            .sink(self.sink.unwrap_or_else(|| Arc::new(TracingSink)));

        for kind in &self.config.kinds {
            for name in &kind.subscribers {
                builder = builder.subscriber(kind.name.clone(), self.factory.build(name)?);
            }
        }

        let fabric = builder.build()?;
        info!(
            default_kind = %fabric.default_kind(),
            kinds = self.config.kinds.len(),
            subscribers = fabric.stats().subscribers,
            strategy = ?synth.strategy,
            "Fabric bootstrapped"
        );
        Ok(fabric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KindConfig;
    use fabric_types::EntityKind;

    fn name(s: &str) -> SubscriberName {
        SubscriberName::parse(s).unwrap()
    }

    #[test]
    fn lookup_prefers_full_name() {
        let factory = SubscriberFactory::new()
            .register("audit", |n| Arc::new(NoopSubscriber::new(n)))
            .register("audit.log", |n| {
                Arc::new(TracingSubscriber::with_strength(n, 0.5))
            });

        assert_eq!(factory.build(&name("audit.log")).unwrap().name(), &name("audit.log"));
        assert_eq!(
            factory.build(&name("audit.trail")).unwrap().name(),
            &name("audit.trail")
        );
        assert!(matches!(
            factory.build(&name("metrics.collector")),
            Err(FabricError::Config(_))
        ));
    }

    #[test]
    fn fallback_catches_everything_else() {
        let factory =
            SubscriberFactory::with_builtins().fallback(|n| Arc::new(NoopSubscriber::new(n)));
        assert!(factory.build(&name("anything.at.all")).is_ok());
    }

    #[test]
    fn builds_configured_kinds() {
        let config = FabricConfig {
            kinds: vec![
                KindConfig {
                    name: EntityKind::parse("sensor").unwrap(),
                    subscribers: vec![name("log.audit"), name("noop.sink")],
                },
                KindConfig {
                    name: EntityKind::parse("actuator").unwrap(),
                    subscribers: vec![name("log.audit")],
                },
            ],
            ..FabricConfig::default()
        };

        let fabric = Bootstrap::new(config, SubscriberFactory::with_builtins())
            .build()
            .unwrap();
        assert_eq!(fabric.stats().subscribers, 3);
        let names: Vec<String> = fabric
            .subscribers("sensor")
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["log.audit", "noop.sink"]);
    }

    #[test]
    fn unknown_subscriber_fails_bootstrap() {
        let config = FabricConfig {
            kinds: vec![KindConfig {
                name: EntityKind::parse("sensor").unwrap(),
                subscribers: vec![name("mystery.module")],
            }],
            ..FabricConfig::default()
        };
        let err = Bootstrap::new(config, SubscriberFactory::with_builtins())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, FabricError::Config(_)));
    }
}
