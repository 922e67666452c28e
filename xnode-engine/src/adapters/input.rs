//! `input.text`: surfaces a caller-supplied value or the node's default

use super::{mismatch, NodeAdapter};
use crate::context::ExecutionContext;
use crate::expr::truthy;
use async_trait::async_trait;
use serde_json::{json, Value};
use xnode_core::{AdapterError, AgentNode, NodeKind};

/// Reads `inputs[inputKey]` (or `inputs[node.id]`), falling back to
/// `defaultValue` and then to the empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputAdapter;

#[async_trait]
impl NodeAdapter for InputAdapter {
    fn node_type(&self) -> &'static str {
        NodeKind::INPUT_TEXT
    }

    async fn execute(
        &self,
        node: &AgentNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, AdapterError> {
        let NodeKind::InputText(data) = &node.kind else {
            return Err(mismatch(self.node_type(), node));
        };

        let key = data
            .input_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(node.id.as_str());

        let text = match ctx.inputs.get(key) {
            Some(value) if truthy(value) => value.clone(),
            _ => match data.default_value.as_deref() {
                Some(default) if !default.is_empty() => Value::String(default.to_string()),
                _ => Value::String(String::new()),
            },
        };

        Ok(json!({ "text": text }))
    }
}
