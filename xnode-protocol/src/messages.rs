//! Wire messages
//!
//! JSON objects discriminated by a snake_case `type` field with camelCase
//! payload fields, e.g. `{"type":"request_task","nodeId":"...",...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use xnode_core::{
    flow_providers, now_ms, AgentId, AuthenticationError, AvailableResources, ExecutionResult,
    JsonMap, NodeCapabilities, NodeId, ResourceError, ResourceRequirements, TaskEnvelope, TaskId,
    TimestampMs, TransportError, DEFAULT_MAX_EXECUTION_TIME_MS,
};

// ============================================================================
// REJECTION CODES
// ============================================================================

/// Why a worker turned down an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    InvalidSignature,
    UntrustedCoordinator,
    AtCapacity,
    InsufficientResources,
    DuplicateTask,
    ShuttingDown,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::InvalidSignature => "invalid_signature",
            RejectionCode::UntrustedCoordinator => "untrusted_coordinator",
            RejectionCode::AtCapacity => "at_capacity",
            RejectionCode::InsufficientResources => "insufficient_resources",
            RejectionCode::DuplicateTask => "duplicate_task",
            RejectionCode::ShuttingDown => "shutting_down",
        }
    }

    /// Signature and trust failures. Retrying elsewhere cannot help.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            RejectionCode::InvalidSignature | RejectionCode::UntrustedCoordinator
        )
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&AuthenticationError> for RejectionCode {
    fn from(err: &AuthenticationError) -> Self {
        match err {
            AuthenticationError::UntrustedCoordinator { .. } => RejectionCode::UntrustedCoordinator,
            _ => RejectionCode::InvalidSignature,
        }
    }
}

impl From<&ResourceError> for RejectionCode {
    fn from(err: &ResourceError) -> Self {
        match err {
            ResourceError::AtCapacity { .. } => RejectionCode::AtCapacity,
            _ => RejectionCode::InsufficientResources,
        }
    }
}

// ============================================================================
// WORKER -> COORDINATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    #[serde(rename_all = "camelCase")]
    Register {
        node_id: NodeId,
        capabilities: NodeCapabilities,
        timestamp: TimestampMs,
    },

    #[serde(rename_all = "camelCase")]
    Heartbeat {
        node_id: NodeId,
        capabilities: NodeCapabilities,
        active_tasks: Vec<TaskId>,
        timestamp: TimestampMs,
    },

    #[serde(rename_all = "camelCase")]
    RequestTask {
        node_id: NodeId,
        available_resources: AvailableResources,
        timestamp: TimestampMs,
    },

    #[serde(rename_all = "camelCase")]
    TaskRejected {
        task_id: TaskId,
        node_id: NodeId,
        code: RejectionCode,
        reason: String,
        timestamp: TimestampMs,
    },

    #[serde(rename_all = "camelCase")]
    TaskCompleted {
        task_id: TaskId,
        node_id: NodeId,
        result: ExecutionResult,
        timestamp: TimestampMs,
    },
}

impl WorkerMessage {
    pub fn register(capabilities: NodeCapabilities) -> Self {
        WorkerMessage::Register {
            node_id: capabilities.node_id.clone(),
            capabilities,
            timestamp: now_ms(),
        }
    }

    pub fn heartbeat(capabilities: NodeCapabilities, active_tasks: Vec<TaskId>) -> Self {
        WorkerMessage::Heartbeat {
            node_id: capabilities.node_id.clone(),
            capabilities,
            active_tasks,
            timestamp: now_ms(),
        }
    }

    pub fn request_task(node_id: impl Into<NodeId>, available: AvailableResources) -> Self {
        WorkerMessage::RequestTask {
            node_id: node_id.into(),
            available_resources: available,
            timestamp: now_ms(),
        }
    }

    pub fn task_rejected(
        task_id: impl Into<TaskId>,
        node_id: impl Into<NodeId>,
        code: RejectionCode,
        reason: impl Into<String>,
    ) -> Self {
        WorkerMessage::TaskRejected {
            task_id: task_id.into(),
            node_id: node_id.into(),
            code,
            reason: reason.into(),
            timestamp: now_ms(),
        }
    }

    pub fn task_completed(node_id: impl Into<NodeId>, result: ExecutionResult) -> Self {
        WorkerMessage::TaskCompleted {
            task_id: result.task_id.clone(),
            node_id: node_id.into(),
            result,
            timestamp: now_ms(),
        }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Register { .. } => "register",
            WorkerMessage::Heartbeat { .. } => "heartbeat",
            WorkerMessage::RequestTask { .. } => "request_task",
            WorkerMessage::TaskRejected { .. } => "task_rejected",
            WorkerMessage::TaskCompleted { .. } => "task_completed",
        }
    }

    pub fn node_id(&self) -> &str {
        match self {
            WorkerMessage::Register { node_id, .. }
            | WorkerMessage::Heartbeat { node_id, .. }
            | WorkerMessage::RequestTask { node_id, .. }
            | WorkerMessage::TaskRejected { node_id, .. }
            | WorkerMessage::TaskCompleted { node_id, .. } => node_id,
        }
    }

    /// Timer-driven messages. A fresher one is always coming, so they are
    /// not worth queueing while disconnected.
    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            WorkerMessage::Heartbeat { .. } | WorkerMessage::RequestTask { .. }
        )
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Decode {
            reason: e.to_string(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Decode {
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// COORDINATOR -> WORKER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    TaskAssigned {
        task: TaskEnvelope,
    },

    #[serde(rename_all = "camelCase")]
    TaskCancelled {
        task_id: TaskId,
    },

    Shutdown,
}

impl CoordinatorMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorMessage::TaskAssigned { .. } => "task_assigned",
            CoordinatorMessage::TaskCancelled { .. } => "task_cancelled",
            CoordinatorMessage::Shutdown => "shutdown",
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Decode {
            reason: e.to_string(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Decode {
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// TASK SUBMISSION
// ============================================================================

fn default_max_execution_time() -> u64 {
    DEFAULT_MAX_EXECUTION_TIME_MS
}

/// The unsigned part of a task, as submitted to a coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    #[serde(default)]
    pub agent_id: AgentId,
    pub flow: Value,
    #[serde(default)]
    pub inputs: JsonMap,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time: u64,
    #[serde(default)]
    pub required_resources: ResourceRequirements,
}

impl TaskSpec {
    pub fn new(flow: Value) -> Self {
        Self {
            agent_id: 0,
            flow,
            inputs: JsonMap::new(),
            priority: 0,
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME_MS,
            required_resources: ResourceRequirements::default(),
        }
    }

    pub fn with_inputs(mut self, inputs: JsonMap) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.required_resources = requirements;
        self
    }

    pub fn with_max_execution_time(mut self, ms: u64) -> Self {
        self.max_execution_time = ms;
        self
    }

    /// Providers a node must support to run this task.
    pub fn required_providers(&self) -> Vec<String> {
        flow_providers(&self.flow)
    }
}
