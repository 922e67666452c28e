//! Execution records: step logs, run results and usage metrics

use crate::identity::{now_ms, TaskId, TimestampMs};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyed JSON values (outputs, artifacts, inputs).
pub type JsonMap = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Success,
    Error,
    Info,
}

/// One entry in a run's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLog {
    pub node_id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub status: StepStatus,
    pub start_time: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<TimestampMs>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepLog {
    pub fn running(node_id: &str, node_type: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: StepStatus::Running,
            start_time: now_ms(),
            end_time: None,
            message: format!("Executing {} node", node_type),
            result: None,
            error: None,
        }
    }

    pub fn failure(node_id: &str, node_type: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        let now = now_ms();
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: StepStatus::Error,
            start_time: now,
            end_time: Some(now),
            message: format!("Error in {} node: {}", node_type, error),
            result: None,
            error: Some(error),
        }
    }

    pub fn info(node_id: &str, node_type: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: StepStatus::Info,
            start_time: now_ms(),
            end_time: None,
            message: message.into(),
            result: None,
            error: None,
        }
    }

    /// Upgrade a running entry to success.
    pub fn succeed(&mut self, result: Value) {
        self.status = StepStatus::Success;
        self.end_time = Some(now_ms());
        self.message = format!("Completed {} node successfully", self.node_type);
        self.result = Some(result);
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }
}

/// Outcome of running one flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRunResult {
    pub success: bool,
    pub outputs: JsonMap,
    pub logs: Vec<StepLog>,
    pub artifacts: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    /// Wall time in milliseconds.
    pub execution_time: u64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub compute_units: u64,
}

/// What a worker reports upstream for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub success: bool,
    pub outputs: JsonMap,
    pub logs: Vec<StepLog>,
    pub metrics: ExecutionMetrics,
    pub artifacts: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub content_hash: String,
}

impl ExecutionResult {
    pub fn from_run(task_id: impl Into<TaskId>, run: FlowRunResult, metrics: ExecutionMetrics) -> Self {
        Self {
            task_id: task_id.into(),
            success: run.success,
            outputs: run.outputs,
            logs: run.logs,
            metrics,
            artifacts: run.artifacts,
            error: run.error,
            content_hash: String::new(),
        }
    }

    /// A failed result with no outputs.
    pub fn failed(task_id: impl Into<TaskId>, error: impl Into<String>, metrics: ExecutionMetrics) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            outputs: JsonMap::new(),
            logs: Vec::new(),
            metrics,
            artifacts: JsonMap::new(),
            error: Some(error.into()),
            content_hash: String::new(),
        }
    }

    pub fn with_content_hash(mut self, hash: String) -> Self {
        self.content_hash = hash;
        self
    }
}

/// Normalised usage: whole seconds scaled by cpu cores and memory in GB.
pub fn compute_units(execution_ms: u64, cpu: f64, memory_mb: f64) -> u64 {
    let base = (execution_ms as f64 / 1000.0).ceil();
    let multiplier = cpu * (memory_mb / 1024.0);
    (base * multiplier).ceil().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_log_upgrade_to_success() {
        let mut log = StepLog::running("in1", "input.text");
        assert_eq!(log.status, StepStatus::Running);
        assert_eq!(log.message, "Executing input.text node");
        log.succeed(json!({"text": "hi"}));
        assert_eq!(log.status, StepStatus::Success);
        assert!(log.end_time.is_some());
        assert_eq!(log.result, Some(json!({"text": "hi"})));
    }

    #[test]
    fn test_step_log_failure() {
        let log = StepLog::failure("b", "http.request", "boom");
        assert!(log.is_error());
        assert_eq!(log.error.as_deref(), Some("boom"));
        assert!(log.message.contains("boom"));
    }

    #[test]
    fn test_step_log_wire_shape() {
        let log = StepLog::info("t", "transform.js", "hello");
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["nodeId"], "t");
        assert_eq!(json["type"], "transform.js");
        assert_eq!(json["status"], "info");
        assert!(json.get("endTime").is_none());
    }

    #[test]
    fn test_compute_units() {
        // 1.5s rounds up to 2s; 2 cores * 2 GB = 4x
        assert_eq!(compute_units(1500, 2.0, 2048.0), 8);
        assert_eq!(compute_units(0, 4.0, 1024.0), 0);
        assert_eq!(compute_units(1, 1.0, 512.0), 1);
    }

    #[test]
    fn test_execution_result_failed() {
        let result = ExecutionResult::failed("t1", "nope", ExecutionMetrics::default());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("nope"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["metrics"]["computeUnits"], 0);
    }
}
