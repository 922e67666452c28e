//! Outbound message buffering across reconnects

use crate::transport::Session;
use std::collections::VecDeque;
use xnode_core::TransportError;
use xnode_protocol::WorkerMessage;

/// Cap on messages held while disconnected. The oldest go first.
pub const MAX_PENDING: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
    Dropped,
}

/// Results and rejections wait for the next session; heartbeats and task
/// requests are dropped.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: VecDeque<WorkerMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&mut self, session: Option<&Session>, message: WorkerMessage) -> Delivery {
        if let Some(session) = session {
            match session.send(&message) {
                Ok(()) => return Delivery::Sent,
                Err(e) => {
                    tracing::debug!(kind = message.kind(), error = %e, "Send failed, buffering")
                }
            }
        }

        if message.is_periodic() {
            tracing::debug!(kind = message.kind(), "Not connected, dropping periodic message");
            return Delivery::Dropped;
        }

        if self.pending.len() >= MAX_PENDING {
            if let Some(evicted) = self.pending.pop_front() {
                tracing::warn!(kind = evicted.kind(), "Outbox full, evicting oldest message");
            }
        }
        self.pending.push_back(message);
        Delivery::Queued
    }

    /// Send everything buffered, in order. Stops at the first failure and
    /// keeps the unsent remainder.
    pub fn flush(&mut self, session: &Session) -> Result<usize, TransportError> {
        let mut sent = 0;
        while let Some(message) = self.pending.pop_front() {
            if let Err(e) = session.send(&message) {
                self.pending.push_front(message);
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{memory_transport, Connector};
    use xnode_core::{AvailableResources, NodeResources};
    use xnode_protocol::RejectionCode;

    fn request() -> WorkerMessage {
        WorkerMessage::request_task(
            "n1",
            AvailableResources::from_capacity(&NodeResources::default_capacity()),
        )
    }

    fn rejection(id: &str) -> WorkerMessage {
        WorkerMessage::task_rejected(id, "n1", RejectionCode::AtCapacity, "full")
    }

    #[test]
    fn test_disconnected_routing() {
        let mut outbox = Outbox::new();
        assert_eq!(outbox.deliver(None, request()), Delivery::Dropped);
        assert_eq!(outbox.deliver(None, rejection("t1")), Delivery::Queued);
        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_preserves_order() {
        let mut outbox = Outbox::new();
        outbox.deliver(None, rejection("t1"));
        outbox.deliver(None, rejection("t2"));

        let (connector, mut listener) = memory_transport();
        let session = connector.connect().await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        assert_eq!(outbox.flush(&session).unwrap(), 2);
        assert!(outbox.is_empty());
        for expected in ["t1", "t2"] {
            match peer.recv().await.unwrap() {
                WorkerMessage::TaskRejected { task_id, .. } => assert_eq!(task_id, expected),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_messages() {
        let mut outbox = Outbox::new();
        outbox.deliver(None, rejection("t1"));

        let (connector, mut listener) = memory_transport();
        let session = connector.connect().await.unwrap();
        drop(listener.accept().await.unwrap());

        assert!(outbox.flush(&session).is_err());
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.deliver(Some(&session), rejection("t2")), Delivery::Queued);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut outbox = Outbox::new();
        for i in 0..=MAX_PENDING {
            outbox.deliver(None, rejection(&format!("t{}", i)));
        }
        assert_eq!(outbox.len(), MAX_PENDING);
    }
}
