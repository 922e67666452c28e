//! xNode worker daemon
//!
//! Connects to a coordinator, advertises what this machine can do, admits
//! signed task assignments within its capacity and runs their flows.

pub mod admission;
pub mod config;
pub mod daemon;
pub mod monitor;
pub mod outbox;
pub mod registry;
pub mod runner;
pub mod transport;

pub use config::{ConfigError, DaemonConfig, IntervalConfig, LlmConfig};
pub use daemon::{Daemon, DaemonState};
pub use monitor::{ResourceMonitor, StaticResourceMonitor};
pub use registry::{CancelledTask, TaskRegistry};
pub use runner::{TaskRunner, CANCELLED_BY_COORDINATOR};
pub use transport::{
    memory_transport, Connector, MemoryConnector, MemoryListener, MemoryPeer, Session,
    WsConnector,
};

use thiserror::Error;
use xnode_protocol::TelemetryError;

/// Anything that stops the daemon before its control loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}
