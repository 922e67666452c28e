//! Registry of connected worker nodes

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use xnode_core::{now_ms, NodeCapabilities, NodeId, TaskId, TimestampMs};
use xnode_protocol::CoordinatorMessage;

/// Channel into one worker socket's writer.
pub type Outbound = mpsc::UnboundedSender<CoordinatorMessage>;

/// Distinguishes successive sockets of the same node.
pub type ConnectionId = u64;

struct NodeEntry {
    capabilities: NodeCapabilities,
    active_tasks: Vec<TaskId>,
    connection: ConnectionId,
    /// `None` while the node's socket is down.
    outbound: Option<Outbound>,
    last_seen: Instant,
    registered_at: TimestampMs,
}

/// What `GET /api/v1/nodes` reports per node.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub connected: bool,
    pub active_tasks: Vec<TaskId>,
    pub registered_at: TimestampMs,
    /// Milliseconds since the last message from the node.
    pub idle_ms: u64,
    pub capabilities: NodeCapabilities,
}

#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<DashMap<NodeId, NodeEntry>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration. Returns false when the node was already
    /// known, in which case its socket is replaced.
    pub fn register(
        &self,
        capabilities: NodeCapabilities,
        connection: ConnectionId,
        outbound: Outbound,
    ) -> bool {
        let node_id = capabilities.node_id.clone();
        let entry = NodeEntry {
            capabilities,
            active_tasks: Vec::new(),
            connection,
            outbound: Some(outbound),
            last_seen: Instant::now(),
            registered_at: now_ms(),
        };
        self.nodes.insert(node_id, entry).is_none()
    }

    /// Refresh capabilities and the active task list. False for unknown nodes.
    pub fn heartbeat(
        &self,
        node_id: &str,
        capabilities: NodeCapabilities,
        active_tasks: Vec<TaskId>,
    ) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(mut entry) => {
                entry.capabilities = capabilities;
                entry.active_tasks = active_tasks;
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn touch(&self, node_id: &str) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(mut entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Detach the socket, unless a newer connection already replaced it.
    pub fn disconnect(&self, node_id: &str, connection: ConnectionId) {
        if let Some(mut entry) = self.nodes.get_mut(node_id) {
            if entry.connection == connection {
                entry.outbound = None;
            }
        }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn is_connected(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .map(|e| e.outbound.is_some())
            .unwrap_or(false)
    }

    pub fn capabilities(&self, node_id: &str) -> Option<NodeCapabilities> {
        self.nodes.get(node_id).map(|e| e.capabilities.clone())
    }

    /// Queue a message on the node's socket. False if it is not connected.
    pub fn send(&self, node_id: &str, message: CoordinatorMessage) -> bool {
        let Some(entry) = self.nodes.get(node_id) else {
            return false;
        };
        entry
            .outbound
            .as_ref()
            .map(|tx| tx.send(message).is_ok())
            .unwrap_or(false)
    }

    /// Send to every connected node; returns how many accepted it.
    pub fn broadcast(&self, message: &CoordinatorMessage) -> usize {
        self.nodes
            .iter()
            .filter_map(|e| e.outbound.as_ref().map(|tx| tx.send(message.clone()).is_ok()))
            .filter(|sent| *sent)
            .count()
    }

    /// Nodes silent for longer than `timeout`.
    pub fn stale(&self, timeout: Duration) -> Vec<NodeId> {
        let now = Instant::now();
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|e| now.duration_since(e.last_seen) > timeout)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn remove(&self, node_id: &str) -> bool {
        self.nodes.remove(node_id).is_some()
    }

    pub fn summaries(&self) -> Vec<NodeSummary> {
        let now = Instant::now();
        let mut all: Vec<NodeSummary> = self
            .nodes
            .iter()
            .map(|e| NodeSummary {
                node_id: e.key().clone(),
                connected: e.outbound.is_some(),
                active_tasks: e.active_tasks.clone(),
                registered_at: e.registered_at,
                idle_ms: u64::try_from(now.duration_since(e.last_seen).as_millis())
                    .unwrap_or(u64::MAX),
                capabilities: e.capabilities.clone(),
            })
            .collect();
        all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        all
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
