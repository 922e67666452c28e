//! Error types for xnode operations

use thiserror::Error;

/// Flow structure, payload and graph errors.
///
/// Every variant is fatal to a single run and never to the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid flow structure: {reason}")]
    InvalidStructure { reason: String },

    #[error("Node {node_id} ({node_type}) has an invalid payload: {reason}")]
    InvalidNode {
        node_id: String,
        node_type: String,
        reason: String,
    },

    #[error("Node {node_id} has unknown type: {node_type}")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("Duplicate node id: {node_id}")]
    DuplicateNode { node_id: String },

    #[error("Edge {edge_id} references non-existent source node: {node_id}")]
    MissingSource { edge_id: String, node_id: String },

    #[error("Edge {edge_id} references non-existent target node: {node_id}")]
    MissingTarget { edge_id: String, node_id: String },

    #[error("LLM node {node_id} missing required model or prompt")]
    LlmMissingFields { node_id: String },

    #[error("HTTP node {node_id} has invalid URL: {url}")]
    InvalidUrl { node_id: String, url: String },

    #[error("Flow validation failed: {}", .errors.join(", "))]
    Rejected { errors: Vec<String> },

    #[error("Flow contains a cycle among nodes: {}", .nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },
}

/// Task signature and trust errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("Coordinator {coordinator_id} is not in the trust store")]
    UntrustedCoordinator { coordinator_id: String },

    #[error("Malformed signature on task {task_id}: {reason}")]
    MalformedSignature { task_id: String, reason: String },

    #[error("Signature verification failed for task {task_id}")]
    InvalidSignature { task_id: String },

    #[error("Invalid key for coordinator {coordinator_id}: {reason}")]
    InvalidKey {
        coordinator_id: String,
        reason: String,
    },
}

/// Admission control failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResourceError {
    #[error("Node at capacity: {active} of {max} task slots in use")]
    AtCapacity { active: usize, max: usize },

    #[error("Insufficient CPU: requires {required} cores, {available} available")]
    InsufficientCpu { required: f64, available: f64 },

    #[error("Insufficient memory: requires {required} MB, {available} MB available")]
    InsufficientMemory { required: u64, available: u64 },

    #[error("Task requires a GPU but none is available")]
    GpuUnavailable,
}

/// LLM provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No LLM provider configured for {provider}")]
    ProviderNotConfigured { provider: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Per-node execution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("No adapter found for node type: {node_type}")]
    NotRegistered { node_type: String },

    #[error("Adapter {adapter} cannot run node {node_id} of type {node_type}")]
    PayloadMismatch {
        adapter: String,
        node_id: String,
        node_type: String,
    },

    #[error("{reason}")]
    Failed { reason: String },

    #[error("HTTP request failed: {reason}")]
    Http { reason: String },

    #[error("Transform execution failed: {reason}")]
    Sandbox { reason: String },

    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),
}

impl AdapterError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Coordinator connection errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("Failed to send message: {reason}")]
    SendFailed { reason: String },

    #[error("Failed to receive message: {reason}")]
    ReceiveFailed { reason: String },

    #[error("Failed to decode message: {reason}")]
    Decode { reason: String },

    #[error("Connection closed")]
    Closed,
}

/// Task registry state machine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskStateError {
    #[error("Task not found: {task_id}")]
    NotFound { task_id: String },

    #[error("Task already registered: {task_id}")]
    AlreadyExists { task_id: String },

    #[error("Illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: String,
        from: String,
        to: String,
    },
}

/// Master error type for all xnode errors.
#[derive(Debug, Clone, Error)]
pub enum XNodeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Task state error: {0}")]
    TaskState(#[from] TaskStateError),
}

/// Result type alias for xnode operations.
pub type XNodeResult<T> = Result<T, XNodeError>;

// =============================================================================
// TESTS
// =============================================================================
