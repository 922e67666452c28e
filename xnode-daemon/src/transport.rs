//! Coordinator transport
//!
//! A [`Connector`] opens a [`Session`]: a pair of channels carrying JSON
//! text out and decoded coordinator messages in. The session ends when the
//! inbound channel closes. [`WsConnector`] bridges a WebSocket onto those
//! channels; [`memory_transport`] wires a worker straight to a test peer.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use xnode_core::TransportError;
use xnode_protocol::{CoordinatorMessage, WorkerMessage};

/// Upper bound on a single connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Inbound = Result<CoordinatorMessage, TransportError>;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Where this connector dials, for logs.
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<Session, TransportError>;
}

/// One live connection to a coordinator.
#[derive(Debug)]
pub struct Session {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<Inbound>,
}

impl Session {
    pub fn new(
        outgoing: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    pub fn send(&self, message: &WorkerMessage) -> Result<(), TransportError> {
        let text = message.to_json()?;
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    /// Next inbound message; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.incoming.recv().await
    }

    pub fn is_open(&self) -> bool {
        !self.outgoing.is_closed()
    }
}

// ============================================================================
// WEBSOCKET
// ============================================================================

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Session, TransportError> {
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            url: self.url.clone(),
            reason,
        };
        let (stream, _) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| connect_failed("timed out".to_string()))?
        .map_err(|e| connect_failed(e.to_string()))?;

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let inbound = match frame {
                    Ok(Message::Text(text)) => CoordinatorMessage::from_json(&text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(Err(TransportError::ReceiveFailed {
                            reason: e.to_string(),
                        }));
                        break;
                    }
                };
                if in_tx.send(inbound).is_err() {
                    break;
                }
            }
        });

        Ok(Session::new(out_tx, in_rx))
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Worker side of an in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<MemoryPeer>,
    online: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

/// Coordinator side: yields one [`MemoryPeer`] per successful connect.
#[derive(Debug)]
pub struct MemoryListener {
    accept: mpsc::UnboundedReceiver<MemoryPeer>,
    online: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

/// A connected pair of in-process endpoints.
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    let online = Arc::new(AtomicBool::new(true));
    let attempts = Arc::new(AtomicUsize::new(0));
    (
        MemoryConnector {
            accept: tx,
            online: Arc::clone(&online),
            attempts: Arc::clone(&attempts),
        },
        MemoryListener {
            accept: rx,
            online,
            attempts,
        },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    fn endpoint(&self) -> &str {
        "memory://coordinator"
    }

    async fn connect(&self) -> Result<Session, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = |reason: &str| TransportError::ConnectFailed {
            url: self.endpoint().to_string(),
            reason: reason.to_string(),
        };
        if !self.online.load(Ordering::SeqCst) {
            return Err(refused("coordinator offline"));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.accept
            .send(MemoryPeer {
                from_worker: out_rx,
                to_worker: in_tx,
            })
            .map_err(|_| refused("listener dropped"))?;
        Ok(Session::new(out_tx, in_rx))
    }
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept.recv().await
    }

    /// While offline every connect attempt fails.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// The coordinator's end of one in-memory session. Dropping it
/// disconnects the worker.
#[derive(Debug)]
pub struct MemoryPeer {
    from_worker: mpsc::UnboundedReceiver<String>,
    to_worker: mpsc::UnboundedSender<Inbound>,
}

impl MemoryPeer {
    /// Next message from the worker; `None` once the worker hung up.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        loop {
            let text = self.from_worker.recv().await?;
            match WorkerMessage::from_json(&text) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!(error = %e, "Memory peer dropped undecodable frame"),
            }
        }
    }

    pub fn send(&self, message: CoordinatorMessage) -> bool {
        self.to_worker.send(Ok(message)).is_ok()
    }

    /// Deliver raw text as if it came off the wire.
    pub fn send_text(&self, text: &str) -> bool {
        self.to_worker
            .send(CoordinatorMessage::from_json(text))
            .is_ok()
    }
}
