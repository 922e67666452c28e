//! xnode Protocol - what crosses the wire between coordinator and workers
//!
//! Message envelopes for both directions, machine-readable rejection
//! codes, ed25519 task signing with a per-coordinator trust store, and the
//! tracing setup both binaries share.

pub mod messages;
pub mod security;
pub mod telemetry;

pub use messages::{CoordinatorMessage, RejectionCode, TaskSpec, WorkerMessage};
pub use security::{signing_payload, TaskSigner, TrustStore, TrustedCoordinator};
pub use telemetry::{init_tracing, LogFormat, TelemetryError};
