//! Task signing and verification
//!
//! Coordinators sign the canonical tuple
//! `{"id","agentId","timestamp","coordinatorId"}` of every envelope they
//! issue with ed25519. Workers verify against the issuing coordinator's
//! public key from a [`TrustStore`] populated out of band (config), never
//! against a key of their own.
//!
//! The flow and inputs are not covered by the signature.

use crate::messages::TaskSpec;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use xnode_core::{
    new_task_id, now_ms, AgentId, AuthenticationError, CoordinatorId, TaskEnvelope, TimestampMs,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedFields<'a> {
    id: &'a str,
    agent_id: AgentId,
    timestamp: TimestampMs,
    coordinator_id: &'a str,
}

/// The exact bytes that are signed for `envelope`.
pub fn signing_payload(envelope: &TaskEnvelope) -> Vec<u8> {
    let fields = SignedFields {
        id: &envelope.id,
        agent_id: envelope.agent_id,
        timestamp: envelope.timestamp,
        coordinator_id: &envelope.coordinator_id,
    };
    // A struct of strings and integers always serializes
    serde_json::to_vec(&fields).unwrap_or_default()
}

fn decode_key_bytes(coordinator_id: &str, encoded: &str) -> Result<[u8; 32], AuthenticationError> {
    let invalid = |reason: String| AuthenticationError::InvalidKey {
        coordinator_id: coordinator_id.to_string(),
        reason,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| invalid(e.to_string()))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| invalid(format!("expected 32 bytes, got {}", bytes.len())))
}

// ============================================================================
// SIGNER (coordinator side)
// ============================================================================

/// A coordinator's identity and signing key.
pub struct TaskSigner {
    coordinator_id: CoordinatorId,
    key: SigningKey,
}

impl TaskSigner {
    pub fn new(coordinator_id: impl Into<CoordinatorId>, key: SigningKey) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            key,
        }
    }

    /// Fresh random key.
    pub fn generate(coordinator_id: impl Into<CoordinatorId>) -> Self {
        Self::new(coordinator_id, SigningKey::from_bytes(&rand::random::<[u8; 32]>()))
    }

    /// Key from a base64-encoded 32-byte seed.
    pub fn from_base64_seed(
        coordinator_id: impl Into<CoordinatorId>,
        seed: &str,
    ) -> Result<Self, AuthenticationError> {
        let coordinator_id = coordinator_id.into();
        let bytes = decode_key_bytes(&coordinator_id, seed)?;
        Ok(Self::new(coordinator_id, SigningKey::from_bytes(&bytes)))
    }

    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Public key as base64, the form trust stores are configured with.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.key.verifying_key().as_bytes())
    }

    pub fn seed_base64(&self) -> String {
        STANDARD.encode(self.key.to_bytes())
    }

    /// The trust store entry workers need for this coordinator.
    pub fn trust_entry(&self) -> TrustedCoordinator {
        TrustedCoordinator {
            id: self.coordinator_id.clone(),
            public_key: self.public_key_base64(),
        }
    }

    /// Base64 detached signature over [`signing_payload`].
    pub fn sign(&self, envelope: &TaskEnvelope) -> String {
        let signature = self.key.sign(&signing_payload(envelope));
        STANDARD.encode(signature.to_bytes())
    }

    /// Turn a submission into a signed envelope with a fresh id.
    pub fn issue(&self, spec: TaskSpec) -> TaskEnvelope {
        self.issue_with_id(new_task_id(), spec)
    }

    pub fn issue_with_id(&self, id: impl Into<String>, spec: TaskSpec) -> TaskEnvelope {
        let mut envelope = TaskEnvelope {
            id: id.into(),
            agent_id: spec.agent_id,
            flow: spec.flow,
            inputs: spec.inputs,
            priority: spec.priority,
            max_execution_time: spec.max_execution_time,
            required_resources: spec.required_resources,
            signature: String::new(),
            timestamp: now_ms(),
            coordinator_id: self.coordinator_id.clone(),
        };
        envelope.signature = self.sign(&envelope);
        envelope
    }
}

impl std::fmt::Debug for TaskSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSigner")
            .field("coordinator_id", &self.coordinator_id)
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TRUST STORE (worker side)
// ============================================================================

/// One trusted coordinator as written in worker config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustedCoordinator {
    pub id: CoordinatorId,
    /// Base64 of the 32-byte ed25519 public key.
    pub public_key: String,
}

/// Coordinator id to public key.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    keys: HashMap<CoordinatorId, VerifyingKey>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config entries, failing on the first bad key.
    pub fn from_entries(entries: &[TrustedCoordinator]) -> Result<Self, AuthenticationError> {
        let mut store = Self::new();
        for entry in entries {
            store.insert_base64(&entry.id, &entry.public_key)?;
        }
        Ok(store)
    }

    pub fn insert(&mut self, coordinator_id: impl Into<CoordinatorId>, key: VerifyingKey) {
        self.keys.insert(coordinator_id.into(), key);
    }

    pub fn insert_base64(
        &mut self,
        coordinator_id: &str,
        public_key: &str,
    ) -> Result<(), AuthenticationError> {
        let bytes = decode_key_bytes(coordinator_id, public_key)?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|e| AuthenticationError::InvalidKey {
            coordinator_id: coordinator_id.to_string(),
            reason: e.to_string(),
        })?;
        self.insert(coordinator_id, key);
        Ok(())
    }

    pub fn with_key(mut self, coordinator_id: impl Into<CoordinatorId>, key: VerifyingKey) -> Self {
        self.insert(coordinator_id, key);
        self
    }

    pub fn contains(&self, coordinator_id: &str) -> bool {
        self.keys.contains_key(coordinator_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify `envelope` against its issuing coordinator's key.
    ///
    /// # Errors
    /// - `UntrustedCoordinator` when the issuer is unknown
    /// - `MalformedSignature` when the signature is not 64 base64 bytes
    /// - `InvalidSignature` when verification fails
    pub fn verify(&self, envelope: &TaskEnvelope) -> Result<(), AuthenticationError> {
        let key = self.keys.get(&envelope.coordinator_id).ok_or_else(|| {
            AuthenticationError::UntrustedCoordinator {
                coordinator_id: envelope.coordinator_id.clone(),
            }
        })?;

        let malformed = |reason: String| AuthenticationError::MalformedSignature {
            task_id: envelope.id.clone(),
            reason,
        };
        let bytes = STANDARD
            .decode(envelope.signature.trim())
            .map_err(|e| malformed(e.to_string()))?;
        let signature = Signature::from_slice(&bytes).map_err(|e| malformed(e.to_string()))?;

        key.verify_strict(&signing_payload(envelope), &signature)
            .map_err(|_| AuthenticationError::InvalidSignature {
                task_id: envelope.id.clone(),
            })
    }

    pub fn is_valid(&self, envelope: &TaskEnvelope) -> bool {
        self.verify(envelope).is_ok()
    }
}
