//! Task registry: the only state shared between the control loop, timers
//! and running tasks.
//!
//! Every state change is a single map operation on one entry, so the
//! terminal transition of a task happens at most once no matter whether
//! completion or cancellation gets there first.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use xnode_core::{
    ResourceRequirements, TaskEnvelope, TaskId, TaskState, TaskStateError, TaskStatus,
};

struct TaskEntry {
    status: TaskStatus,
    task: Arc<TaskEnvelope>,
    cancel: watch::Sender<bool>,
}

/// What [`TaskRegistry::cancel`] took out of the registry.
#[derive(Debug, Clone)]
pub struct CancelledTask {
    pub status: TaskStatus,
    pub task: Arc<TaskEnvelope>,
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<TaskId, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly admitted task and hand back its cancel signal.
    pub fn insert(
        &self,
        task: Arc<TaskEnvelope>,
        node_id: &str,
    ) -> Result<watch::Receiver<bool>, TaskStateError> {
        match self.tasks.entry(task.id.clone()) {
            Entry::Occupied(_) => Err(TaskStateError::AlreadyExists {
                task_id: task.id.clone(),
            }),
            Entry::Vacant(slot) => {
                let (cancel, rx) = watch::channel(false);
                let status =
                    TaskStatus::assigned(&task.id, node_id, task.required_resources.clone());
                slot.insert(TaskEntry {
                    status,
                    task,
                    cancel,
                });
                Ok(rx)
            }
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|e| e.status.clone())
    }

    pub fn start(&self, task_id: &str) -> Result<(), TaskStateError> {
        self.transition(task_id, TaskState::Running).map(|_| ())
    }

    /// Move a task to its terminal state. Fails if the task was cancelled
    /// and removed, or already finished.
    pub fn finish(&self, task_id: &str, state: TaskState) -> Result<TaskStatus, TaskStateError> {
        self.transition(task_id, state)
    }

    fn transition(&self, task_id: &str, next: TaskState) -> Result<TaskStatus, TaskStateError> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskStateError::NotFound {
                task_id: task_id.to_string(),
            })?;
        entry.status.transition(next)?;
        Ok(entry.status.clone())
    }

    /// Fail and remove an active task, firing its cancel signal.
    ///
    /// Returns `None` if the task is unknown or already terminal.
    pub fn cancel(&self, task_id: &str) -> Option<CancelledTask> {
        let (_, mut entry) = self
            .tasks
            .remove_if(task_id, |_, e| e.status.status.is_active())?;
        // Assigned and running may both move to failed
        let _ = entry.status.transition(TaskState::Failed);
        entry.status.logs.push("Task cancelled by coordinator".to_string());
        let _ = entry.cancel.send(true);
        Some(CancelledTask {
            status: entry.status,
            task: entry.task,
        })
    }

    pub fn remove(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.remove(task_id).map(|(_, e)| e.status)
    }

    /// Remove a task only if it has reached a terminal state.
    pub fn purge(&self, task_id: &str) -> bool {
        self.tasks
            .remove_if(task_id, |_, e| e.status.status.is_terminal())
            .is_some()
    }

    /// Ids of tasks in {assigned, running}, sorted.
    pub fn active_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|e| e.status.status.is_active())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.count(TaskState::is_active)
    }

    pub fn running_count(&self) -> usize {
        self.count(|s| *s == TaskState::Running)
    }

    fn count(&self, pred: impl Fn(&TaskState) -> bool) -> usize {
        self.tasks.iter().filter(|e| pred(&e.status.status)).count()
    }

    /// What admitted, unfinished tasks have claimed.
    pub fn active_requirements(&self) -> Vec<ResourceRequirements> {
        self.tasks
            .iter()
            .filter(|e| e.status.status.is_active())
            .map(|e| e.status.requirements.clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<TaskStatus> {
        let mut all: Vec<TaskStatus> = self.tasks.iter().map(|e| e.status.clone()).collect();
        all.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        all
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.len())
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xnode_test_utils::fixtures::unsigned_task;

    fn envelope(id: &str, requirements: ResourceRequirements) -> Arc<TaskEnvelope> {
        Arc::new(unsigned_task(id, requirements))
    }

    fn registry_with(id: &str) -> (TaskRegistry, watch::Receiver<bool>) {
        let registry = TaskRegistry::new();
        let rx = registry
            .insert(envelope(id, ResourceRequirements::default()), "n1")
            .unwrap();
        (registry, rx)
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let (registry, _rx) = registry_with("t1");
        assert_eq!(
            registry
                .insert(envelope("t1", ResourceRequirements::default()), "n1")
                .unwrap_err(),
            TaskStateError::AlreadyExists {
                task_id: "t1".to_string()
            }
        );
    }

    #[test]
    fn test_lifecycle_counts() {
        let (registry, _rx) = registry_with("t1");
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.running_count(), 0);

        registry.start("t1").unwrap();
        assert_eq!(registry.running_count(), 1);
        assert_eq!(registry.active_ids(), vec!["t1".to_string()]);

        let status = registry.finish("t1", TaskState::Completed).unwrap();
        assert_eq!(status.status, TaskState::Completed);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.contains("t1"));

        assert!(registry.purge("t1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_purge_keeps_active_tasks() {
        let (registry, _rx) = registry_with("t1");
        assert!(!registry.purge("t1"));
        assert!(registry.contains("t1"));
    }

    #[test]
    fn test_cancel_fires_signal_and_removes() {
        let (registry, rx) = registry_with("t1");
        registry.start("t1").unwrap();

        let cancelled = registry.cancel("t1").unwrap();
        assert_eq!(cancelled.status.status, TaskState::Failed);
        assert_eq!(cancelled.task.id, "t1");
        assert!(*rx.borrow());
        assert!(!registry.contains("t1"));

        // The run finishing later cannot produce a second terminal state
        assert!(registry.finish("t1", TaskState::Completed).is_err());
        assert!(registry.cancel("t1").is_none());
    }

    #[test]
    fn test_cancel_after_finish_is_ignored() {
        let (registry, rx) = registry_with("t1");
        registry.start("t1").unwrap();
        registry.finish("t1", TaskState::Completed).unwrap();

        assert!(registry.cancel("t1").is_none());
        assert!(!*rx.borrow());
        assert!(registry.contains("t1"));
    }

    #[test]
    fn test_active_requirements_exclude_finished() {
        let registry = TaskRegistry::new();
        let _a = registry
            .insert(envelope("a", ResourceRequirements::new(2.0, 100)), "n")
            .unwrap();
        let _b = registry
            .insert(envelope("b", ResourceRequirements::new(1.0, 100)), "n")
            .unwrap();
        registry.start("b").unwrap();
        registry.finish("b", TaskState::Failed).unwrap();

        assert_eq!(
            registry.active_requirements(),
            vec![ResourceRequirements::new(2.0, 100)]
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use xnode_test_utils::fixtures::unsigned_task;

    #[derive(Debug, Clone)]
    enum Op {
        Start,
        Complete,
        Fail,
        Cancel,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Start),
            Just(Op::Complete),
            Just(Op::Fail),
            Just(Op::Cancel),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// At most one operation ever moves a task into a terminal state.
        #[test]
        fn prop_single_terminal_transition(ops in prop::collection::vec(arb_op(), 1..12)) {
            let registry = TaskRegistry::new();
            let task = Arc::new(unsigned_task("t", ResourceRequirements::default()));
            let _rx = registry.insert(task, "n").unwrap();
            let mut terminal = 0;
            for op in ops {
                let reached = match op {
                    Op::Start => { let _ = registry.start("t"); false }
                    Op::Complete => registry.finish("t", TaskState::Completed).is_ok(),
                    Op::Fail => registry.finish("t", TaskState::Failed).is_ok(),
                    Op::Cancel => registry.cancel("t").is_some(),
                };
                if reached {
                    terminal += 1;
                }
            }
            prop_assert!(terminal <= 1);
        }
    }
}
