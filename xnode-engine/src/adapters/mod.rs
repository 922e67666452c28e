//! Node adapters and the registry the executor dispatches through
//!
//! One adapter per node type. The registry is fixed at construction:
//! [`AdapterRegistry::standard`] installs the six built-in adapters and
//! embedders may replace any of them with [`AdapterRegistry::register`].

mod http;
mod input;
mod llm;
mod logic;
mod output;
mod transform;

pub use http::HttpAdapter;
pub use input::InputAdapter;
pub use llm::LlmAdapter;
pub use logic::LogicAdapter;
pub use output::OutputAdapter;
pub use transform::TransformAdapter;

use crate::context::ExecutionContext;
use crate::expr::SandboxLimits;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use xnode_core::{AdapterError, AgentNode};
use xnode_llm::{CostTracker, ProviderRegistry};

/// Default timeout for `http.request` nodes.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// Executes one node type against the shared context.
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    /// The dotted type tag this adapter serves.
    fn node_type(&self) -> &'static str;

    /// Run `node` and return the value stored under `outputs[node.id]`.
    async fn execute(
        &self,
        node: &AgentNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, AdapterError>;
}

pub(crate) fn mismatch(adapter: &'static str, node: &AgentNode) -> AdapterError {
    AdapterError::PayloadMismatch {
        adapter: adapter.to_string(),
        node_id: node.id.clone(),
        node_type: node.node_type().to_string(),
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Settings the built-in adapters are constructed with.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Route every `agent.llm` node to the mock provider.
    pub mock_mode: bool,
    /// Simulated latency of mock completions.
    pub mock_delay: Duration,
    pub http_timeout: Duration,
    pub sandbox: SandboxLimits,
    pub providers: ProviderRegistry,
    pub cost_tracker: Arc<CostTracker>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            mock_mode: false,
            mock_delay: Duration::ZERO,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            sandbox: SandboxLimits::default(),
            providers: ProviderRegistry::new(),
            cost_tracker: Arc::new(CostTracker::new()),
        }
    }
}

impl AdapterConfig {
    /// Mock LLM calls with no delay.
    pub fn mock() -> Self {
        Self {
            mock_mode: true,
            ..Self::default()
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Node type tag to adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn NodeAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in adapter for every node type.
    pub fn standard(config: &AdapterConfig) -> Self {
        let mut registry = Self::new();
        registry.install(Arc::new(InputAdapter));
        registry.install(Arc::new(LlmAdapter::new(config)));
        registry.install(Arc::new(HttpAdapter::new(config.http_timeout)));
        registry.install(Arc::new(OutputAdapter));
        registry.install(Arc::new(TransformAdapter::new(config.sandbox.clone())));
        registry.install(Arc::new(LogicAdapter::new(config.sandbox.clone())));
        registry
    }

    /// Register `adapter` under its own type tag.
    pub fn install(&mut self, adapter: Arc<dyn NodeAdapter>) {
        self.adapters.insert(adapter.node_type(), adapter);
    }

    /// Register `adapter` under an explicit type tag.
    pub fn register(&mut self, node_type: &'static str, adapter: Arc<dyn NodeAdapter>) {
        self.adapters.insert(node_type, adapter);
    }

    /// # Errors
    /// `AdapterError::NotRegistered` if nothing serves `node_type`.
    pub fn get(&self, node_type: &str) -> Result<Arc<dyn NodeAdapter>, AdapterError> {
        self.adapters
            .get(node_type)
            .cloned()
            .ok_or_else(|| AdapterError::NotRegistered {
                node_type: node_type.to_string(),
            })
    }

    pub fn has(&self, node_type: &str) -> bool {
        self.adapters.contains_key(node_type)
    }

    pub fn remove(&mut self, node_type: &str) -> Option<Arc<dyn NodeAdapter>> {
        self.adapters.remove(node_type)
    }

    /// Registered type tags, sorted.
    pub fn node_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.adapters.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.node_types())
            .finish()
    }
}
