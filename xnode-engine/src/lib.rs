//! xnode Engine - flow validation and execution
//!
//! A flow is validated once into a [`ValidatedFlow`], ordered with Kahn's
//! algorithm and run node by node through the [`AdapterRegistry`].
//! `transform.js` and `logic.if` nodes evaluate inside the restricted
//! [`expr::Sandbox`]; nothing in a flow can reach the host.

pub mod adapters;
pub mod context;
pub mod executor;
pub mod expr;
pub mod template;
pub mod validator;

pub use adapters::{
    AdapterConfig, AdapterRegistry, HttpAdapter, InputAdapter, LlmAdapter, LogicAdapter,
    NodeAdapter, OutputAdapter, TransformAdapter, DEFAULT_HTTP_TIMEOUT,
};
pub use context::ExecutionContext;
pub use executor::{execution_order, FlowExecutor, RunOptions, CANCELLED_MESSAGE};
pub use expr::{Evaluation, Sandbox, SandboxError, SandboxLimits};
pub use template::interpolate;
pub use validator::{
    validate, validate_flow, validate_flow_value, validate_value, ValidatedFlow, ValidationReport,
};
