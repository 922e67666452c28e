//! Worker WebSocket endpoint
//!
//! Each worker holds one socket. Inbound text frames are decoded as
//! [`WorkerMessage`]s and handed to the scheduler; outbound
//! [`CoordinatorMessage`]s are queued on a per-socket channel and written
//! by a dedicated task.

use crate::nodes::ConnectionId;
use crate::scheduler::Scheduler;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use xnode_core::NodeId;
use xnode_protocol::{CoordinatorMessage, WorkerMessage};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let connection = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
    debug!(connection, "Worker socket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state.scheduler, connection))
}

async fn handle_socket(socket: WebSocket, scheduler: Arc<Scheduler>, connection: ConnectionId) {
    info!(connection, "Worker socket connected");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<CoordinatorMessage>();

    // Ends once every sender is gone: ours below and the registry's copy.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = send_message(&mut sender, &message).await {
                warn!(connection, kind = message.kind(), error = %e, "Failed to write to worker socket");
                break;
            }
        }
    });

    let mut node_id: Option<NodeId> = None;
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match WorkerMessage::from_json(&text) {
                    Ok(message) => {
                        debug!(connection, kind = message.kind(), node_id = %message.node_id(), "Worker message");
                        if let Some(id) = scheduler.handle_message(connection, &tx, message) {
                            node_id = Some(id);
                        }
                    }
                    Err(e) => warn!(connection, error = %e, "Ignoring undecodable worker message"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection, "Worker closed socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection, error = %e, "Worker socket receive error");
                    break;
                }
            },
            _ = &mut send_task => {
                debug!(connection, "Worker socket writer stopped");
                break;
            }
        }
    }

    if let Some(id) = &node_id {
        scheduler.nodes().disconnect(id, connection);
    }
    drop(tx);
    send_task.abort();
    info!(connection, node_id = ?node_id, "Worker socket disconnected");
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &CoordinatorMessage,
) -> Result<(), axum::Error> {
    let json = message.to_json().map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}
