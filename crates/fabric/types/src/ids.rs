//! Validated string identifiers.
//!
//! Identifiers are checked once at the boundary; everything past
//! construction can rely on them being well formed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, FabricResult};

/// Maximum entity id length, in characters.
pub const MAX_ENTITY_ID_LEN: usize = 128;
/// Maximum kind length, in characters.
pub const MAX_KIND_LEN: usize = 64;
/// Maximum subscriber name length, in characters.
pub const MAX_SUBSCRIBER_NAME_LEN: usize = 128;

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = FabricError;

            fn try_from(raw: String) -> FabricResult<Self> {
                Self::parse(raw)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = FabricError;

            fn try_from(raw: &str) -> FabricResult<Self> {
                Self::parse(raw)
            }
        }

        impl FromStr for $name {
            type Err = FabricError;

            fn from_str(raw: &str) -> FabricResult<Self> {
                Self::parse(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

/// Unique identifier of an entity record within one fabric.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn parse(raw: impl Into<String>) -> FabricResult<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(FabricError::validation("entity id must not be empty"));
        }
        if raw.chars().count() > MAX_ENTITY_ID_LEN {
            return Err(FabricError::validation(format!(
                "entity id exceeds {} characters",
                MAX_ENTITY_ID_LEN
            )));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(FabricError::validation(format!(
                "entity id {:?} contains whitespace or control characters",
                raw
            )));
        }
        Ok(Self(raw))
    }
}

string_id!(EntityId);

/// Caller-supplied category of entity. Subscribers are registered per kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKind(String);

impl EntityKind {
    /// Kind used when a caller registers without naming one.
    pub const DEFAULT: &'static str = "entity";

    pub fn parse(raw: impl Into<String>) -> FabricResult<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.chars().count() > MAX_KIND_LEN {
            return Err(FabricError::validation(format!(
                "kind must be 1..={} characters",
                MAX_KIND_LEN
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(FabricError::validation(format!(
                "kind {:?} may only contain [A-Za-z0-9_.-]",
                raw
            )));
        }
        Ok(Self(raw))
    }
}

impl Default for EntityKind {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

string_id!(EntityKind);

/// Dotted name of a subscriber target, e.g. `moduleA.componentB`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriberName(String);

impl SubscriberName {
    pub fn parse(raw: impl Into<String>) -> FabricResult<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.chars().count() > MAX_SUBSCRIBER_NAME_LEN {
            return Err(FabricError::validation(format!(
                "subscriber name must be 1..={} characters",
                MAX_SUBSCRIBER_NAME_LEN
            )));
        }
        let well_formed = raw.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        });
        if !well_formed {
            return Err(FabricError::validation(format!(
                "subscriber name {:?} must be dot-separated [A-Za-z0-9_-] segments",
                raw
            )));
        }
        Ok(Self(raw))
    }

    /// Segments of the dotted name, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

string_id!(SubscriberName);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_rejects_empty_and_whitespace() {
        assert!(EntityId::parse("").is_err());
        assert!(EntityId::parse("a 1").is_err());
        assert!(EntityId::parse("a\n1").is_err());
        assert!(EntityId::parse("x".repeat(MAX_ENTITY_ID_LEN + 1)).is_err());
        assert_eq!(EntityId::parse("a1").unwrap().as_str(), "a1");
    }

    #[test]
    fn entity_id_accepts_unicode() {
        assert!(EntityId::parse("nœud-α/7").is_ok());
    }

    #[test]
    fn kind_charset() {
        assert!(EntityKind::parse("quantum.core_v2-x").is_ok());
        assert!(EntityKind::parse("has space").is_err());
        assert!(EntityKind::parse("slash/kind").is_err());
        assert!(EntityKind::parse("").is_err());
    }

    #[test]
    fn default_kind_is_a_valid_kind() {
        let kind = EntityKind::default();
        assert_eq!(kind.as_str(), EntityKind::DEFAULT);
        assert_eq!(EntityKind::parse(EntityKind::DEFAULT).unwrap(), kind);
    }

    #[test]
    fn subscriber_name_is_dotted() {
        let name = SubscriberName::parse("moduleA.componentB").unwrap();
        assert_eq!(name.segments().collect::<Vec<_>>(), vec!["moduleA", "componentB"]);
        assert!(SubscriberName::parse("single").is_ok());
        assert!(SubscriberName::parse("a..b").is_err());
        assert!(SubscriberName::parse(".a").is_err());
        assert!(SubscriberName::parse("a.b.").is_err());
        assert!(SubscriberName::parse("a.b c").is_err());
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: EntityId = serde_json::from_str("\"a1\"").unwrap();
        assert_eq!(ok.as_str(), "a1");
        assert!(serde_json::from_str::<EntityId>("\"\"").is_err());
        assert!(serde_json::from_str::<SubscriberName>("\"a..b\"").is_err());
    }
}
