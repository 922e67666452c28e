//! xnode Core - Entity Types
//!
//! Pure data structures shared by the worker, the coordinator and the flow
//! engine. No I/O lives here.

pub mod capabilities;
pub mod error;
pub mod execution;
pub mod flow;
pub mod identity;
pub mod task;

pub use capabilities::{
    default_providers, AvailableResources, CpuInfo, GpuInfo, Location, MemoryInfo,
    NodeCapabilities, NodeResources, ResourceRequirements, DEFAULT_MAX_CONCURRENT_TASKS,
    DEFAULT_REPUTATION, PROTOCOL_VERSION,
};
pub use error::{
    AdapterError, AuthenticationError, LlmError, ResourceError, TaskStateError, TransportError,
    ValidationError, XNodeError, XNodeResult,
};
pub use execution::{
    compute_units, ExecutionMetrics, ExecutionResult, FlowRunResult, JsonMap, StepLog, StepStatus,
};
pub use flow::{
    AgentNode, Flow, FlowEdge, HttpMethod, HttpNodeData, InputTextData, LlmNodeData,
    LlmProviderKind, LogicData, NodeKind, OutputTextData, Position, RawNode, TransformData,
    DEFAULT_FLOW_VERSION,
};
pub use identity::{
    compute_content_hash, json_content_hash, new_task_id, now_ms, AgentId, ContentHash,
    CoordinatorId, NodeId, TaskId, Timestamp, TimestampMs,
};
pub use task::{
    flow_providers, TaskEnvelope, TaskState, TaskStatus, DEFAULT_MAX_EXECUTION_TIME_MS,
};
