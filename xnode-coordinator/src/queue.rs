//! Pending task queue: higher priority first, FIFO within a priority.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use xnode_core::TaskId;

type Slot = (Reverse<i32>, u64);

#[derive(Debug, Default)]
struct Inner {
    slots: BTreeMap<Slot, TaskId>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue behind everything of equal or higher priority.
    pub fn push(&self, task_id: impl Into<TaskId>, priority: i32) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert((Reverse(priority), seq), task_id.into());
    }

    /// Take the first task, in queue order, that `accept` agrees to.
    pub fn take_first<F>(&self, mut accept: F) -> Option<TaskId>
    where
        F: FnMut(&str) -> bool,
    {
        let mut inner = self.lock();
        let slot = inner
            .slots
            .iter()
            .find(|(_, id)| accept(id))
            .map(|(slot, _)| *slot)?;
        inner.slots.remove(&slot)
    }

    pub fn remove(&self, task_id: &str) -> bool {
        let mut inner = self.lock();
        let slot = inner
            .slots
            .iter()
            .find(|(_, id)| id.as_str() == task_id)
            .map(|(slot, _)| *slot);
        match slot {
            Some(slot) => inner.slots.remove(&slot).is_some(),
            None => false,
        }
    }

    /// Task ids in the order they would be handed out.
    pub fn snapshot(&self) -> Vec<TaskId> {
        self.lock().slots.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_then_fifo() {
        let queue = TaskQueue::new();
        queue.push("low", 0);
        queue.push("high-1", 5);
        queue.push("mid", 1);
        queue.push("high-2", 5);
        assert_eq!(queue.snapshot(), vec!["high-1", "high-2", "mid", "low"]);
    }

    #[test]
    fn test_take_first_skips_unacceptable() {
        let queue = TaskQueue::new();
        queue.push("big", 9);
        queue.push("small", 0);
        assert_eq!(queue.take_first(|id| id != "big").as_deref(), Some("small"));
        assert_eq!(queue.snapshot(), vec!["big"]);
        assert_eq!(queue.take_first(|_| false), None);
    }

    #[test]
    fn test_remove() {
        let queue = TaskQueue::new();
        queue.push("a", 0);
        assert!(queue.remove("a"));
        assert!(!queue.remove("a"));
        assert!(queue.is_empty());
    }
}
