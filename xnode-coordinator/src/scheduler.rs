//! Task scheduling
//!
//! The [`Scheduler`] owns the node registry, the task records and the
//! pending queue. Worker messages arrive through [`Scheduler::handle_message`];
//! HTTP handlers call [`Scheduler::submit`] and [`Scheduler::cancel`]; the
//! sweeper calls [`Scheduler::sweep`].
//!
//! Lock order: the queue mutex may be held while reading a task record,
//! never the other way round.

use crate::nodes::{ConnectionId, NodeRegistry, Outbound};
use crate::queue::TaskQueue;
use crate::tasks::{Rejection, TaskPhase, TaskRecord, TaskStore};
use std::time::Duration;
use xnode_core::{
    new_task_id, now_ms, AvailableResources, ExecutionResult, NodeCapabilities, NodeId, TaskId,
};
use xnode_protocol::{CoordinatorMessage, TaskSigner, TaskSpec, WorkerMessage};

/// Error recorded on a task cancelled through the API.
pub const CANCELLED_BY_API: &str = "Task cancelled";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task {task_id} not found")]
    NotFound { task_id: TaskId },

    #[error("Task {task_id} already finished")]
    AlreadyFinished { task_id: TaskId },
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<NodeId>,
    pub requeued: usize,
    pub failed: usize,
    pub purged: usize,
}

#[derive(Debug)]
pub struct Scheduler {
    signer: TaskSigner,
    nodes: NodeRegistry,
    tasks: TaskStore,
    queue: TaskQueue,
    max_attempts: u32,
}

enum Requeue {
    Queued(i32),
    Failed,
    Skipped,
}

impl Scheduler {
    pub fn new(signer: TaskSigner, max_attempts: u32) -> Self {
        Self {
            signer,
            nodes: NodeRegistry::new(),
            tasks: TaskStore::new(),
            queue: TaskQueue::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn signer(&self) -> &TaskSigner {
        &self.signer
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn task(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id)
    }

    /// Pending task ids in hand-out order.
    pub fn pending(&self) -> Vec<TaskId> {
        self.queue.snapshot()
    }

    /// Record a new task and queue it.
    pub fn submit(&self, spec: TaskSpec) -> TaskRecord {
        let priority = spec.priority;
        let record = TaskRecord::queued(new_task_id(), spec);
        let task_id = record.task_id.clone();
        self.tasks.insert(record.clone());
        self.queue.push(task_id.clone(), priority);
        tracing::info!(task_id = %task_id, priority, "Task queued");
        record
    }

    /// Apply one worker message received on connection `connection`.
    ///
    /// Returns the node id the connection now speaks for when the message
    /// (re-)registered a node.
    pub fn handle_message(
        &self,
        connection: ConnectionId,
        outbound: &Outbound,
        message: WorkerMessage,
    ) -> Option<NodeId> {
        match message {
            WorkerMessage::Register {
                node_id,
                capabilities,
                ..
            } => Some(self.register(node_id, capabilities, connection, outbound)),
            WorkerMessage::Heartbeat {
                node_id,
                capabilities,
                active_tasks,
                ..
            } => {
                if self
                    .nodes
                    .heartbeat(&node_id, capabilities.clone(), active_tasks)
                {
                    return None;
                }
                // Coordinator restarted under a live worker.
                Some(self.register(node_id, capabilities, connection, outbound))
            }
            WorkerMessage::RequestTask {
                node_id,
                available_resources,
                ..
            } => {
                if !self.nodes.touch(&node_id) {
                    tracing::warn!(node_id = %node_id, "Task request from unregistered node");
                    return None;
                }
                self.assign(&node_id, &available_resources);
                None
            }
            WorkerMessage::TaskRejected {
                task_id,
                node_id,
                code,
                reason,
                timestamp,
            } => {
                self.nodes.touch(&node_id);
                self.on_rejected(
                    &task_id,
                    Rejection {
                        node_id,
                        code,
                        reason,
                        timestamp,
                    },
                );
                None
            }
            WorkerMessage::TaskCompleted {
                node_id, result, ..
            } => {
                self.nodes.touch(&node_id);
                self.on_completed(&node_id, result);
                None
            }
        }
    }

    fn register(
        &self,
        node_id: NodeId,
        mut capabilities: NodeCapabilities,
        connection: ConnectionId,
        outbound: &Outbound,
    ) -> NodeId {
        capabilities.node_id = node_id.clone();
        let fresh = self
            .nodes
            .register(capabilities, connection, outbound.clone());
        tracing::info!(node_id = %node_id, connection, fresh, "Node registered");
        node_id
    }

    /// Hand the first eligible queued task to `node_id`.
    pub fn assign(&self, node_id: &str, available: &AvailableResources) -> Option<TaskId> {
        let capabilities = self.nodes.capabilities(node_id)?;
        let task_id = self.queue.take_first(|id| {
            self.tasks
                .get(id)
                .map(|r| eligible(&r, &capabilities, available))
                .unwrap_or(false)
        })?;

        let envelope = self.tasks.update(&task_id, |r| {
            if r.status != TaskPhase::Queued {
                return None;
            }
            r.assign(node_id);
            Some((
                self.signer.issue_with_id(task_id.as_str(), r.spec.clone()),
                r.attempts,
            ))
        });
        let Some(Some((envelope, attempt))) = envelope else {
            return None;
        };

        if self
            .nodes
            .send(node_id, CoordinatorMessage::TaskAssigned { task: envelope })
        {
            tracing::info!(task_id = %task_id, node_id = %node_id, attempt, "Task assigned");
            Some(task_id)
        } else {
            tracing::warn!(task_id = %task_id, node_id = %node_id, "Assignment undeliverable, requeueing");
            self.requeue_or_fail(&task_id, "Node disconnected before assignment");
            None
        }
    }

    fn on_rejected(&self, task_id: &str, rejection: Rejection) {
        let node_id = rejection.node_id.clone();
        let code = rejection.code;
        tracing::warn!(
            task_id = %task_id,
            node_id = %node_id,
            code = %code,
            reason = %rejection.reason,
            "Task rejected"
        );

        let reason = format!("Rejected by {}: {}", node_id, rejection.reason);
        let current = self.tasks.update(task_id, |r| {
            r.rejections.push(rejection);
            r.status == TaskPhase::Assigned && r.node_id.as_deref() == Some(node_id.as_str())
        });
        if current != Some(true) {
            return;
        }

        if code.is_authentication() {
            self.tasks.update(task_id, |r| r.fail(reason));
        } else {
            self.requeue_or_fail(task_id, &reason);
        }
    }

    fn on_completed(&self, node_id: &str, result: ExecutionResult) {
        let task_id = result.task_id.clone();
        let success = result.success;
        let accepted = self.tasks.update(&task_id, |r| match r.status {
            TaskPhase::Completed | TaskPhase::Failed => None,
            previous => {
                r.node_id = Some(node_id.to_string());
                r.finish(result);
                Some(previous)
            }
        });

        match accepted {
            None => tracing::warn!(task_id = %task_id, node_id = %node_id, "Result for unknown task"),
            Some(None) => {
                tracing::debug!(task_id = %task_id, node_id = %node_id, "Duplicate result ignored")
            }
            Some(Some(previous)) => {
                if previous == TaskPhase::Queued {
                    self.queue.remove(&task_id);
                }
                tracing::info!(task_id = %task_id, node_id = %node_id, success, "Task finished");
            }
        }
    }

    fn requeue_or_fail(&self, task_id: &str, reason: &str) -> Requeue {
        let max_attempts = self.max_attempts;
        let outcome = self
            .tasks
            .update(task_id, |r| {
                if r.status != TaskPhase::Assigned {
                    return Requeue::Skipped;
                }
                if r.attempts >= max_attempts {
                    r.fail(format!(
                        "{} (gave up after {} attempts)",
                        reason, r.attempts
                    ));
                    Requeue::Failed
                } else {
                    r.requeue();
                    Requeue::Queued(r.spec.priority)
                }
            })
            .unwrap_or(Requeue::Skipped);

        match outcome {
            Requeue::Queued(priority) => {
                self.queue.push(task_id, priority);
                tracing::info!(task_id = %task_id, "Task requeued");
            }
            Requeue::Failed => tracing::warn!(task_id = %task_id, reason, "Task failed"),
            Requeue::Skipped => {}
        }
        outcome
    }

    /// Cancel a queued or assigned task. An assigned task's node is told
    /// to stop; its eventual result is still attached to the record.
    pub fn cancel(&self, task_id: &str) -> Result<TaskRecord, SchedulerError> {
        let outcome = self
            .tasks
            .update(task_id, |r| {
                if r.status.is_finished() {
                    return Err(SchedulerError::AlreadyFinished {
                        task_id: task_id.to_string(),
                    });
                }
                let previous = r.status;
                r.status = TaskPhase::Cancelled;
                r.error = Some(CANCELLED_BY_API.to_string());
                r.updated_at = now_ms();
                Ok((previous, r.node_id.clone(), r.clone()))
            })
            .ok_or_else(|| SchedulerError::NotFound {
                task_id: task_id.to_string(),
            })??;

        let (previous, node_id, record) = outcome;
        match (previous, node_id) {
            (TaskPhase::Queued, _) => {
                self.queue.remove(task_id);
            }
            (TaskPhase::Assigned, Some(node_id)) => {
                let delivered = self.nodes.send(
                    &node_id,
                    CoordinatorMessage::TaskCancelled {
                        task_id: task_id.to_string(),
                    },
                );
                tracing::info!(task_id = %task_id, node_id = %node_id, delivered, "Cancellation sent");
            }
            _ => {}
        }
        tracing::info!(task_id = %task_id, "Task cancelled");
        Ok(record)
    }

    /// Evict nodes silent past `timeout`, requeue what they held and drop
    /// finished records older than `retention`.
    pub fn sweep(&self, timeout: Duration, retention: Duration) -> SweepReport {
        let mut report = SweepReport::default();

        for node_id in self.nodes.stale(timeout) {
            self.nodes.remove(&node_id);
            tracing::warn!(node_id = %node_id, "Evicting unresponsive node");
            for task_id in self.tasks.assigned_to(&node_id) {
                match self.requeue_or_fail(&task_id, "Node became unresponsive") {
                    Requeue::Queued(_) => report.requeued += 1,
                    Requeue::Failed => report.failed += 1,
                    Requeue::Skipped => {}
                }
            }
            report.evicted.push(node_id);
        }

        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        report.purged = self
            .tasks
            .purge_finished(now_ms().saturating_sub(retention_ms));
        report
    }

    /// Tell every connected worker to drain and stop.
    pub fn shutdown(&self) -> usize {
        let notified = self.nodes.broadcast(&CoordinatorMessage::Shutdown);
        tracing::info!(nodes = notified, "Shutdown broadcast");
        notified
    }
}

fn eligible(
    record: &TaskRecord,
    capabilities: &NodeCapabilities,
    available: &AvailableResources,
) -> bool {
    record.status == TaskPhase::Queued
        && available.fits(&record.spec.required_resources)
        && record
            .spec
            .required_providers()
            .iter()
            .all(|p| capabilities.supports_provider(p))
}
