//! Coordinator-side task records

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use xnode_core::{now_ms, ExecutionResult, NodeId, TaskId, TimestampMs};
use xnode_protocol::{RejectionCode, TaskSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Queued,
    Assigned,
    Completed,
    Failed,
    Cancelled,
}

impl TaskPhase {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskPhase::Completed | TaskPhase::Failed | TaskPhase::Cancelled
        )
    }
}

/// One refusal reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub node_id: NodeId,
    pub code: RejectionCode,
    pub reason: String,
    pub timestamp: TimestampMs,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskPhase,
    #[serde(flatten)]
    pub spec: TaskSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Assignments made so far.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<Rejection>,
    pub submitted_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl TaskRecord {
    pub fn queued(task_id: impl Into<TaskId>, spec: TaskSpec) -> Self {
        let now = now_ms();
        Self {
            task_id: task_id.into(),
            status: TaskPhase::Queued,
            spec,
            node_id: None,
            attempts: 0,
            result: None,
            error: None,
            rejections: Vec::new(),
            submitted_at: now,
            updated_at: now,
        }
    }

    pub fn assign(&mut self, node_id: &str) {
        self.status = TaskPhase::Assigned;
        self.node_id = Some(node_id.to_string());
        self.attempts += 1;
        self.touch();
    }

    pub fn requeue(&mut self) {
        self.status = TaskPhase::Queued;
        self.node_id = None;
        self.touch();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskPhase::Failed;
        self.error = Some(error.into());
        self.touch();
    }

    /// Attach a worker's result. A cancelled record stays cancelled.
    pub fn finish(&mut self, result: ExecutionResult) {
        if self.status != TaskPhase::Cancelled {
            self.status = if result.success {
                TaskPhase::Completed
            } else {
                TaskPhase::Failed
            };
            self.error = result.error.clone();
        }
        self.result = Some(result);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

#[derive(Clone, Default)]
pub struct TaskStore {
    records: Arc<DashMap<TaskId, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TaskRecord) {
        self.records.insert(record.task_id.clone(), record);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.records.get(task_id).map(|r| r.clone())
    }

    /// Mutate one record under its shard lock.
    pub fn update<R>(&self, task_id: &str, f: impl FnOnce(&mut TaskRecord) -> R) -> Option<R> {
        self.records.get_mut(task_id).map(|mut r| f(&mut r))
    }

    /// Ids of tasks currently assigned to `node_id`.
    pub fn assigned_to(&self, node_id: &str) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .records
            .iter()
            .filter(|r| r.status == TaskPhase::Assigned && r.node_id.as_deref() == Some(node_id))
            .map(|r| r.task_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop finished records last touched before `cutoff`.
    pub fn purge_finished(&self, cutoff: TimestampMs) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.status.is_finished() && r.updated_at < cutoff));
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("records", &self.records.len())
            .finish()
    }
}
