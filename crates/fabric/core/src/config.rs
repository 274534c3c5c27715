//! Fabric configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional file,
//! then `FABRIC_`-prefixed environment variables. Nested keys use a double
//! underscore, e.g. `FABRIC_DISPATCH__DELIVERY_TIMEOUT_MS=500`.

use std::collections::HashSet;

use fabric_dispatch::DispatchConfig;
use fabric_recovery::RecoveryConfig;
use fabric_store::DuplicatePolicy;
use fabric_synth::random::DEFAULT_MAX_DRIFT;
use fabric_types::{EntityKind, FabricError, FabricResult, MetricCatalog, SubscriberName};
use serde::{Deserialize, Serialize};

/// Top-level fabric configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Kind used by `register` when no kind is given
    #[serde(default = "default_kind")]
    pub default_kind: EntityKind,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub metrics: MetricCatalog,

    #[serde(default)]
    pub synthesizer: SynthesizerConfig,

    /// Subscribers wired per kind by the bootstrap
    #[serde(default)]
    pub kinds: Vec<KindConfig>,
}

/// Which synthesis strategy the bootstrap installs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesizerKind {
    #[default]
    Random,
    Deterministic,
}

/// Synthesis strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    #[serde(default)]
    pub strategy: SynthesizerKind,

    /// Fixed seed for the random strategy
    #[serde(default)]
    pub seed: Option<u64>,

    /// Relative drift bound applied on amplification
    #[serde(default = "default_max_drift")]
    pub max_drift: f64,
}

/// Subscribers for one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindConfig {
    pub name: EntityKind,

    #[serde(default)]
    pub subscribers: Vec<SubscriberName>,
}

fn default_kind() -> EntityKind {
    EntityKind::default()
}

fn default_max_drift() -> f64 {
    DEFAULT_MAX_DRIFT
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            strategy: SynthesizerKind::default(),
            seed: None,
            max_drift: default_max_drift(),
        }
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            default_kind: default_kind(),
            duplicate_policy: DuplicatePolicy::default(),
            dispatch: DispatchConfig::default(),
            recovery: RecoveryConfig::default(),
            metrics: MetricCatalog::default(),
            synthesizer: SynthesizerConfig::default(),
            kinds: Vec::new(),
        }
    }
}

impl FabricConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&str>) -> FabricResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(
            config::Config::try_from(&FabricConfig::default()).map_err(config_error)?,
        );

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FABRIC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: FabricConfig = builder
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the deserializer cannot express.
    pub fn validate(&self) -> FabricResult<()> {
        if self.dispatch.delivery_timeout_ms == 0 {
            return Err(FabricError::Config(
                "dispatch.delivery_timeout_ms must be positive".into(),
            ));
        }
        if self.dispatch.max_in_flight == 0 {
            return Err(FabricError::Config(
                "dispatch.max_in_flight must be positive".into(),
            ));
        }
        if !self.synthesizer.max_drift.is_finite()
            || !(0.0..=0.5).contains(&self.synthesizer.max_drift)
        {
            return Err(FabricError::Config(format!(
                "synthesizer.max_drift {} outside [0, 0.5]",
                self.synthesizer.max_drift
            )));
        }
        if self.metrics.is_empty() {
            return Err(FabricError::Config("metric catalog is empty".into()));
        }

        let mut kinds = HashSet::new();
        for kind in &self.kinds {
            if !kinds.insert(&kind.name) {
                return Err(FabricError::Config(format!(
                    "kind {} configured twice",
                    kind.name
                )));
            }
            let mut names = HashSet::new();
            for name in &kind.subscribers {
                if !names.insert(name) {
                    return Err(FabricError::Config(format!(
                        "subscriber {} listed twice for kind {}",
                        name, kind.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> FabricError {
    FabricError::Config(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = FabricConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_kind.as_str(), "entity");
        assert_eq!(config.dispatch.delivery_timeout_ms, 250);
        assert_eq!(config.recovery.max_recovery_attempts, 5);
        assert_eq!(config.metrics.len(), 3);
        assert_eq!(config.synthesizer.strategy, SynthesizerKind::Random);
    }

    #[test]
    fn loads_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
default_kind = "sensor"
duplicate_policy = "overwrite"

[dispatch]
delivery_timeout_ms = 500

[synthesizer]
strategy = "deterministic"

[[kinds]]
name = "sensor"
subscribers = ["audit.log", "metrics.collector"]
"#
        )
        .unwrap();

        let config = FabricConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.default_kind.as_str(), "sensor");
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Overwrite);
        assert_eq!(config.dispatch.delivery_timeout_ms, 500);
        assert_eq!(config.dispatch.event_retention, 4096);
        assert_eq!(config.synthesizer.strategy, SynthesizerKind::Deterministic);
        assert_eq!(config.kinds.len(), 1);
        assert_eq!(config.kinds[0].subscribers.len(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = FabricConfig::load(Some("/nonexistent/fabric-config.toml")).unwrap_err();
        assert!(matches!(err, FabricError::Config(_)));
    }

    #[test]
    fn rejects_duplicate_subscribers() {
        let config = FabricConfig {
            kinds: vec![KindConfig {
                name: EntityKind::parse("sensor").unwrap(),
                subscribers: vec![
                    SubscriberName::parse("audit.log").unwrap(),
                    SubscriberName::parse("audit.log").unwrap(),
                ],
            }],
            ..FabricConfig::default()
        };
        assert!(matches!(config.validate(), Err(FabricError::Config(_))));
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = FabricConfig::default();
        config.dispatch.delivery_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
