//! Task envelopes and the worker-local task state machine

use crate::capabilities::ResourceRequirements;
use crate::error::TaskStateError;
use crate::execution::JsonMap;
use crate::identity::{now_ms, AgentId, CoordinatorId, NodeId, TaskId, TimestampMs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Default hard deadline for a task run: five minutes.
pub const DEFAULT_MAX_EXECUTION_TIME_MS: u64 = 300_000;

/// Distinct non-mock providers of the `agent.llm` nodes in a flow's JSON.
pub fn flow_providers(flow: &Value) -> Vec<String> {
    let mut providers: Vec<String> = flow
        .get("nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter(|n| n.get("type").and_then(Value::as_str) == Some("agent.llm"))
                .filter_map(|n| n.pointer("/data/provider").and_then(Value::as_str))
                .filter(|p| *p != "mock")
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    providers.sort();
    providers.dedup();
    providers
}

/// A signed unit of work. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    pub id: TaskId,
    pub agent_id: AgentId,
    /// Flow graph as caller-supplied JSON; validated by the worker.
    pub flow: Value,
    #[serde(default)]
    pub inputs: JsonMap,
    #[serde(default)]
    pub priority: i32,
    /// Hard deadline in milliseconds.
    pub max_execution_time: u64,
    pub required_resources: ResourceRequirements,
    pub signature: String,
    pub timestamp: TimestampMs,
    pub coordinator_id: CoordinatorId,
}

impl TaskEnvelope {
    /// Distinct LLM providers named by `agent.llm` nodes in the flow.
    pub fn required_providers(&self) -> Vec<String> {
        flow_providers(&self.flow)
    }

    /// Identifier of the flow inside the envelope, if it carries one.
    pub fn flow_id(&self) -> Option<&str> {
        self.flow.get("id").and_then(Value::as_str)
    }
}

/// Per-task state. `Assigned -> Running -> {Completed | Failed}`.
///
/// `Assigned -> Failed` is also legal so a task cancelled before it starts
/// still reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Assigned => "assigned",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Counted against `maxConcurrentTasks`.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::Running)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Assigned, TaskState::Running)
                | (TaskState::Assigned, TaskState::Failed)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker-local record of an owned task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub status: TaskState,
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<TimestampMs>,
    /// Fraction complete, 0.0 to 1.0.
    pub progress: f64,
    pub logs: Vec<String>,
    /// Resources claimed while the task is active.
    pub requirements: ResourceRequirements,
}

impl TaskStatus {
    pub fn assigned(
        task_id: impl Into<TaskId>,
        node_id: impl Into<NodeId>,
        requirements: ResourceRequirements,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskState::Assigned,
            node_id: node_id.into(),
            start_time: None,
            end_time: None,
            progress: 0.0,
            logs: vec!["Task assigned".to_string()],
            requirements,
        }
    }

    /// Apply a state transition, stamping times on the way.
    pub fn transition(&mut self, next: TaskState) -> Result<(), TaskStateError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskStateError::IllegalTransition {
                task_id: self.task_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        match next {
            TaskState::Running => self.start_time = Some(now_ms()),
            TaskState::Completed | TaskState::Failed => {
                self.end_time = Some(now_ms());
                self.progress = 1.0;
            }
            TaskState::Assigned => {}
        }
        self.status = next;
        self.logs.push(format!("Task {}", next));
        Ok(())
    }
}
