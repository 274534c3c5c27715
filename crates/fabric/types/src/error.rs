use thiserror::Error;

use crate::ids::{EntityId, EntityKind, SubscriberName};

/// Errors surfaced by fabric operations.
///
/// Per-target delivery failures are not errors: they are reported as
/// [`DispatchFailure`](crate::DispatchFailure) values inside a
/// [`DispatchResult`](crate::DispatchResult).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FabricError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("entity not found: {0}")]
    NotFound(EntityId),

    #[error("entity already exists: {0}")]
    AlreadyExists(EntityId),

    #[error("recovery exhausted for entity {entity_id}: {reason}")]
    RecoveryExhausted { entity_id: EntityId, reason: String },

    #[error("subscriber {name} already registered for kind {kind}")]
    SubscriberConflict {
        kind: EntityKind,
        name: SubscriberName,
    },

    #[error("subscriber {name} not registered for kind {kind}")]
    SubscriberNotFound {
        kind: EntityKind,
        name: SubscriberName,
    },

    #[error("invalid metric catalog: {0}")]
    InvalidCatalog(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FabricError {
    pub fn validation(reason: impl Into<String>) -> Self {
        FabricError::Validation(reason.into())
    }

    pub fn exhausted(entity_id: EntityId, reason: impl Into<String>) -> Self {
        FabricError::RecoveryExhausted {
            entity_id,
            reason: reason.into(),
        }
    }

    /// Only an exhausted recovery terminates an operation chain.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FabricError::RecoveryExhausted { .. })
    }

    /// Caller-side errors: the request itself was wrong for the current state.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FabricError::Validation(_)
                | FabricError::NotFound(_)
                | FabricError::AlreadyExists(_)
                | FabricError::SubscriberConflict { .. }
                | FabricError::SubscriberNotFound { .. }
        )
    }
}

/// Result type for fabric operations.
pub type FabricResult<T> = Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhaustion_is_fatal() {
        let id = EntityId::parse("a1").unwrap();
        assert!(FabricError::exhausted(id.clone(), "gone").is_fatal());
        assert!(!FabricError::NotFound(id.clone()).is_fatal());
        assert!(!FabricError::AlreadyExists(id).is_fatal());
        assert!(!FabricError::validation("bad").is_fatal());
    }

    #[test]
    fn rejections_exclude_exhaustion() {
        assert!(FabricError::validation("empty id").is_rejection());
        let id = EntityId::parse("a1").unwrap();
        assert!(FabricError::AlreadyExists(id.clone()).is_rejection());
        assert!(!FabricError::exhausted(id, "x").is_rejection());
    }

    #[test]
    fn display_carries_entity_id() {
        let id = EntityId::parse("node.7").unwrap();
        let msg = FabricError::NotFound(id).to_string();
        assert_eq!(msg, "entity not found: node.7");
    }
}
