//! `output.text`: renders its template against the context

use super::{mismatch, NodeAdapter};
use crate::context::ExecutionContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use xnode_core::{AdapterError, AgentNode, NodeKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputAdapter;

#[async_trait]
impl NodeAdapter for OutputAdapter {
    fn node_type(&self) -> &'static str {
        NodeKind::OUTPUT_TEXT
    }

    async fn execute(
        &self,
        node: &AgentNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, AdapterError> {
        let NodeKind::OutputText(data) = &node.kind else {
            return Err(mismatch(self.node_type(), node));
        };
        Ok(json!({ "text": ctx.interpolate(&data.template) }))
    }
}
