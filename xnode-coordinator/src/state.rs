//! Shared application state

use crate::config::{ConfigError, CoordinatorConfig};
use crate::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Instant;
use xnode_engine::FlowExecutor;

/// Handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// Runs flows submitted to `/api/v1/flow/run`.
    pub executor: Arc<FlowExecutor>,
    pub started: Instant,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, executor: Arc<FlowExecutor>) -> Self {
        Self {
            scheduler,
            executor,
            started: Instant::now(),
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Result<Self, ConfigError> {
        let scheduler = Scheduler::new(config.signer()?, config.max_attempts);
        let executor = FlowExecutor::from_config(&config.adapter_config());
        Ok(Self::new(Arc::new(scheduler), Arc::new(executor)))
    }
}
