//! `transform.js`: runs a program in the expression sandbox

use super::{mismatch, NodeAdapter};
use crate::context::ExecutionContext;
use crate::expr::{Sandbox, SandboxLimits};
use async_trait::async_trait;
use serde_json::{Map, Value};
use xnode_core::{AdapterError, AgentNode, NodeKind, StepLog};

/// Evaluates the node's code with `inputs` and `outputs` in scope.
/// Anything the program logs becomes an `info` step log. A null result is
/// stored as `{}`.
#[derive(Debug, Clone, Default)]
pub struct TransformAdapter {
    sandbox: Sandbox,
}

impl TransformAdapter {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            sandbox: Sandbox::new(limits),
        }
    }
}

#[async_trait]
impl NodeAdapter for TransformAdapter {
    fn node_type(&self) -> &'static str {
        NodeKind::TRANSFORM_JS
    }

    async fn execute(
        &self,
        node: &AgentNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, AdapterError> {
        let NodeKind::TransformJs(data) = &node.kind else {
            return Err(mismatch(self.node_type(), node));
        };
        if data.code.trim().is_empty() {
            return Err(AdapterError::failed("Transform node missing code"));
        }

        let evaluation = self
            .sandbox
            .run(&data.code, &ctx.sandbox_bindings())
            .map_err(|e| AdapterError::Sandbox {
                reason: e.to_string(),
            })?;

        for line in evaluation.logs {
            ctx.logs.push(StepLog::info(&node.id, self.node_type(), line));
        }

        Ok(match evaluation.value {
            Value::Null => Value::Object(Map::new()),
            value => value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xnode_core::{Position, StepStatus, TransformData};

    fn node(code: &str) -> AgentNode {
        AgentNode {
            id: "t".to_string(),
            position: Position::default(),
            kind: NodeKind::TransformJs(TransformData {
                code: code.to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_transform_reads_outputs() {
        let mut ctx = ExecutionContext::default();
        ctx.outputs.insert("in1".to_string(), json!({"text": "hello"}));
        let out = TransformAdapter::default()
            .execute(&node("return { shout: outputs.in1.text.toUpperCase() }"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"shout": "HELLO"}));
    }

    #[tokio::test]
    async fn test_null_result_becomes_empty_object() {
        let out = TransformAdapter::default()
            .execute(&node("let x = 1"), &mut ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!({}));
    }

    #[tokio::test]
    async fn test_logs_become_info_steps() {
        let mut ctx = ExecutionContext::default();
        TransformAdapter::default()
            .execute(&node("console.log('seen'); return 1"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.logs.len(), 1);
        assert_eq!(ctx.logs[0].status, StepStatus::Info);
        assert_eq!(ctx.logs[0].message, "seen");
    }

    #[tokio::test]
    async fn test_missing_code_fails() {
        let err = TransformAdapter::default()
            .execute(&node(" \n "), &mut ExecutionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Transform node missing code");
    }

    #[tokio::test]
    async fn test_sandbox_error_fails_node() {
        let err = TransformAdapter::default()
            .execute(&node("return fetch('http://x')"), &mut ExecutionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Transform execution failed: fetch is not a function");
    }
}
