//! xNode coordinator
//!
//! Accepts task submissions over HTTP, keeps a registry of worker nodes
//! connected over WebSocket, and hands signed tasks to nodes that poll with
//! enough free capacity.

pub mod config;
pub mod error;
pub mod nodes;
pub mod queue;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod sweeper;
pub mod tasks;
pub mod ws;

pub use config::{ConfigError, CoordinatorConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use nodes::{NodeRegistry, NodeSummary};
pub use queue::TaskQueue;
pub use routes::create_router;
pub use scheduler::{Scheduler, SchedulerError, SweepReport};
pub use state::AppState;
pub use sweeper::{sweeper_task, SweeperConfig, SweeperMetrics};
pub use tasks::{TaskPhase, TaskRecord, TaskStore};

use std::net::SocketAddr;
use thiserror::Error;
use xnode_protocol::TelemetryError;

/// Anything that stops the coordinator from serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
