//! `logic.if`: evaluates a condition and reports which branch it selects

use super::{mismatch, NodeAdapter};
use crate::context::ExecutionContext;
use crate::expr::{truthy, Sandbox, SandboxLimits};
use async_trait::async_trait;
use serde_json::{json, Value};
use xnode_core::{AdapterError, AgentNode, NodeKind};

/// Interpolates the condition, evaluates it in the sandbox and returns
/// `{result, path}`. A condition that fails to evaluate is false.
#[derive(Debug, Clone, Default)]
pub struct LogicAdapter {
    sandbox: Sandbox,
}

impl LogicAdapter {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            sandbox: Sandbox::new(limits),
        }
    }
}

#[async_trait]
impl NodeAdapter for LogicAdapter {
    fn node_type(&self) -> &'static str {
        NodeKind::LOGIC_IF
    }

    async fn execute(
        &self,
        node: &AgentNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, AdapterError> {
        let NodeKind::LogicIf(data) = &node.kind else {
            return Err(mismatch(self.node_type(), node));
        };
        if data.condition.trim().is_empty() {
            return Err(AdapterError::failed("Logic node missing condition"));
        }

        let condition = ctx.interpolate(&data.condition);
        let result = match self.sandbox.evaluate(&condition, &ctx.sandbox_bindings()) {
            Ok(value) => truthy(&value),
            Err(e) => {
                tracing::debug!(node_id = %node.id, %condition, error = %e, "Condition evaluated to false");
                false
            }
        };

        Ok(json!({
            "result": result,
            "path": if result { "true" } else { "false" },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xnode_core::{LogicData, Position};

    fn node(condition: &str) -> AgentNode {
        AgentNode {
            id: "if".to_string(),
            position: Position::default(),
            kind: NodeKind::LogicIf(LogicData {
                condition: condition.to_string(),
            }),
        }
    }

    async fn run(condition: &str, ctx: &mut ExecutionContext) -> Result<Value, AdapterError> {
        LogicAdapter::default().execute(&node(condition), ctx).await
    }

    #[tokio::test]
    async fn test_interpolated_condition() {
        let mut ctx = ExecutionContext::default();
        ctx.outputs.insert("http".to_string(), json!({"status": 200}));
        let out = run("{{outputs.http.status}} === 200", &mut ctx).await.unwrap();
        assert_eq!(out, json!({"result": true, "path": "true"}));
    }

    #[tokio::test]
    async fn test_condition_sees_bindings() {
        let mut ctx = ExecutionContext::default();
        ctx.inputs.insert("n".to_string(), json!(2));
        let out = run("inputs.n > 5", &mut ctx).await.unwrap();
        assert_eq!(out, json!({"result": false, "path": "false"}));
    }

    #[tokio::test]
    async fn test_evaluation_error_is_false() {
        let out = run("this is not valid", &mut ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out["path"], "false");
    }

    #[tokio::test]
    async fn test_missing_condition_fails() {
        let err = run("  ", &mut ExecutionContext::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Logic node missing condition");
    }
}
