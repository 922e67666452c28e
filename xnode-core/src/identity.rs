//! Identity and time types shared across the network

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identifier of a task issued by a coordinator.
pub type TaskId = String;

/// Identifier of a worker node.
pub type NodeId = String;

/// Identifier of a coordinator, used as the trust store key.
pub type CoordinatorId = String;

/// Numeric identifier of the agent a task runs on behalf of.
pub type AgentId = u64;

/// Wire timestamp: milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash for correlating a run with its inputs and outputs.
pub type ContentHash = [u8; 32];

/// Current time as epoch milliseconds.
pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// Generate a new task id (UUIDv7, timestamp-sortable).
pub fn new_task_id() -> TaskId {
    format!("task_{}", Uuid::now_v7().simple())
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encoded SHA-256 of the JSON serialization of `value`.
///
/// `serde_json` maps are key-sorted, so equal values hash equally
/// regardless of insertion order.
pub fn json_content_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(compute_content_hash(&bytes))
}
