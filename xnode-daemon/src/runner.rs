//! Runs one admitted task to an [`ExecutionResult`]

use crate::monitor::{memory_used, ResourceMonitor};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use xnode_core::{
    compute_units, json_content_hash, ExecutionMetrics, ExecutionResult, Flow, TaskEnvelope,
    ValidationError,
};
use xnode_engine::{FlowExecutor, RunOptions};

/// Error recorded when the coordinator cancels a task.
pub const CANCELLED_BY_COORDINATOR: &str = "Task cancelled by coordinator";

#[derive(Clone)]
pub struct TaskRunner {
    executor: Arc<FlowExecutor>,
    monitor: Arc<dyn ResourceMonitor>,
}

impl TaskRunner {
    pub fn new(executor: Arc<FlowExecutor>, monitor: Arc<dyn ResourceMonitor>) -> Self {
        Self { executor, monitor }
    }

    /// Run the task's flow under its deadline and cancel signal.
    ///
    /// Never fails: every problem becomes a failed result.
    pub async fn run(&self, task: &TaskEnvelope, cancel: watch::Receiver<bool>) -> ExecutionResult {
        let started = Instant::now();
        let mut options = RunOptions::default().with_cancel(cancel);
        if task.max_execution_time > 0 {
            options = options.with_deadline(Duration::from_millis(task.max_execution_time));
        }

        let outcome = match serde_json::from_value::<Flow>(task.flow.clone()) {
            Ok(flow) => self
                .executor
                .execute_with(&flow, task.inputs.clone(), options)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(ValidationError::InvalidStructure {
                reason: e.to_string(),
            }
            .to_string()),
        };

        let metrics = self.metrics(task, started.elapsed());
        let result = match outcome {
            Ok(run) => ExecutionResult::from_run(task.id.clone(), run, metrics),
            Err(error) => ExecutionResult::failed(task.id.clone(), error, metrics),
        };
        seal(task, result)
    }

    fn metrics(&self, task: &TaskEnvelope, elapsed: Duration) -> ExecutionMetrics {
        let execution_time = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let snapshot = self.monitor.snapshot();
        let required = &task.required_resources;
        ExecutionMetrics {
            execution_time,
            cpu_usage: snapshot.cpu.usage,
            memory_usage: memory_used(&snapshot) as f64,
            compute_units: compute_units(execution_time, required.cpu, required.memory as f64),
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("adapters", &self.executor.adapters())
            .finish_non_exhaustive()
    }
}

/// Attach the content hash over `{taskId, flowId, inputs, outputs}`.
pub fn seal(task: &TaskEnvelope, result: ExecutionResult) -> ExecutionResult {
    let hash = json_content_hash(&json!({
        "taskId": task.id,
        "flowId": task.flow_id(),
        "inputs": task.inputs,
        "outputs": result.outputs,
    }));
    result.with_content_hash(hash)
}

/// A failed result for a task that never produced one of its own.
pub fn failed_result(task: &TaskEnvelope, error: impl Into<String>) -> ExecutionResult {
    seal(
        task,
        ExecutionResult::failed(task.id.clone(), error, ExecutionMetrics::default()),
    )
}
