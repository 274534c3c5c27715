use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::{FabricError, FabricResult};
use crate::ids::{EntityId, EntityKind};
use crate::metrics::Metrics;

/// Maximum context label length, in characters.
pub const MAX_CONTEXT_LEN: usize = 256;

/// Opaque caller configuration stored with a record.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Reject payloads with empty keys. Values are opaque.
pub fn validate_payload(payload: &Payload) -> FabricResult<()> {
    if payload.keys().any(|k| k.is_empty()) {
        return Err(FabricError::validation("payload keys must not be empty"));
    }
    Ok(())
}

/// Context labels are free-form but bounded and printable.
pub fn validate_context(context: &str) -> FabricResult<()> {
    if context.chars().count() > MAX_CONTEXT_LEN {
        return Err(FabricError::validation(format!(
            "context exceeds {} characters",
            MAX_CONTEXT_LEN
        )));
    }
    if context.chars().any(char::is_control) {
        return Err(FabricError::validation(
            "context must not contain control characters",
        ));
    }
    Ok(())
}

/// Recovery state of a record.
///
/// `Nominal --(fault)--> Degraded --(successful amplify)--> Nominal`,
/// `Degraded --(recovery fails)--> Unrecoverable` (terminal until forgotten).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordHealth {
    #[default]
    Nominal,
    Degraded,
    Unrecoverable,
}

impl std::fmt::Display for RecordHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordHealth::Nominal => write!(f, "nominal"),
            RecordHealth::Degraded => write!(f, "degraded"),
            RecordHealth::Unrecoverable => write!(f, "unrecoverable"),
        }
    }
}

/// BLAKE3 content signature of a record. Used for external verification and
/// corruption detection, not secrecy.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub [u8; 32]);

impl Signature {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "...")
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", self)
    }
}

fn compute_signature(
    id: &EntityId,
    kind: &EntityKind,
    payload: &Payload,
    context: &str,
    updated_at: &Timestamp,
) -> Signature {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"entity-record-v1:");

    hasher.update(&(id.as_str().len() as u32).to_le_bytes());
    hasher.update(id.as_str().as_bytes());

    hasher.update(&(kind.as_str().len() as u32).to_le_bytes());
    hasher.update(kind.as_str().as_bytes());

    // Map keys are ordered, so the JSON encoding is canonical
    if let Ok(payload_bytes) = serde_json::to_vec(payload) {
        hasher.update(&(payload_bytes.len() as u32).to_le_bytes());
        hasher.update(&payload_bytes);
    }

    hasher.update(&(context.len() as u32).to_le_bytes());
    hasher.update(context.as_bytes());

    hasher.update(&updated_at.physical.to_le_bytes());
    hasher.update(&updated_at.logical.to_le_bytes());

    Signature(*hasher.finalize().as_bytes())
}

/// The stored unit of state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub payload: Payload,
    /// Free-form label such as a layer or dimension name
    pub context: String,
    pub created_at: Timestamp,
    /// Never earlier than `created_at`; strictly increases per mutation
    pub updated_at: Timestamp,
    pub metrics: Metrics,
    pub signature: Signature,
    /// Incremented on every committed mutation
    pub revision: u64,
    pub health: RecordHealth,
    pub last_recovery_at: Option<Timestamp>,
    /// Consecutive fault recoveries since the last healthy mutation
    pub recovery_attempts: u32,
}

impl EntityRecord {
    /// Create a record with no metrics yet. The caller synthesizes them.
    pub fn new(
        id: EntityId,
        kind: EntityKind,
        payload: Payload,
        context: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        let context = context.into();
        let signature = compute_signature(&id, &kind, &payload, &context, &at);
        Self {
            id,
            kind,
            payload,
            context,
            created_at: at,
            updated_at: at,
            metrics: Metrics::new(),
            signature,
            revision: 1,
            health: RecordHealth::Nominal,
            last_recovery_at: None,
            recovery_attempts: 0,
        }
    }

    /// Replace payload and context, bump `updated_at` and the revision,
    /// and re-sign.
    pub fn apply(&mut self, payload: Payload, context: impl Into<String>, at: Timestamp) {
        self.payload = payload;
        self.context = context.into();
        self.touch(at);
    }

    /// Advance `updated_at` to `at` (never backwards) and re-sign.
    pub fn touch(&mut self, at: Timestamp) {
        self.updated_at = self.updated_at.max(at);
        self.revision += 1;
        self.reseal();
    }

    pub fn reseal(&mut self) {
        self.signature = self.expected_signature();
    }

    pub fn expected_signature(&self) -> Signature {
        compute_signature(
            &self.id,
            &self.kind,
            &self.payload,
            &self.context,
            &self.updated_at,
        )
    }

    pub fn verify_signature(&self) -> bool {
        self.signature == self.expected_signature()
    }

    pub fn is_degraded(&self) -> bool {
        self.health == RecordHealth::Degraded
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.health == RecordHealth::Unrecoverable
    }

    /// Immutable copy for dispatch. The record may mutate after this returns.
    pub fn snapshot(&self, captured_at: Timestamp) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: self.id.clone(),
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            context: self.context.clone(),
            metrics: self.metrics.clone(),
            signature: self.signature,
            revision: self.revision,
            updated_at: self.updated_at,
            captured_at,
        }
    }
}

/// Point-in-time copy of a record carried by sync notices and events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub payload: Payload,
    pub context: String,
    pub metrics: Metrics,
    pub signature: Signature,
    pub revision: u64,
    pub updated_at: Timestamp,
    pub captured_at: Timestamp,
}

impl EntitySnapshot {
    /// A snapshot is valid when its signature matches its content.
    pub fn verify(&self) -> FabricResult<()> {
        let expected = compute_signature(
            &self.entity_id,
            &self.kind,
            &self.payload,
            &self.context,
            &self.updated_at,
        );
        if expected != self.signature {
            return Err(FabricError::validation(format!(
                "snapshot of {} (revision {}) fails signature check",
                self.entity_id, self.revision
            )));
        }
        if self.captured_at < self.updated_at {
            return Err(FabricError::validation(format!(
                "snapshot of {} captured before its last update",
                self.entity_id
            )));
        }
        Ok(())
    }
}
