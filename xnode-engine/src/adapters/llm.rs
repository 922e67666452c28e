//! `agent.llm`: prompt completion through the provider registry

use super::{mismatch, AdapterConfig, NodeAdapter};
use crate::context::ExecutionContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use xnode_core::{AdapterError, AgentNode, LlmProviderKind, NodeKind};
use xnode_llm::{CompletionRequest, CostTracker, LlmProvider, MockLlmProvider, ProviderRegistry};

/// Interpolates the prompt and delegates to the configured provider.
///
/// Nodes whose provider is `mock`, and every node when mock mode is on,
/// are served by [`MockLlmProvider`] without touching the network.
#[derive(Debug, Clone)]
pub struct LlmAdapter {
    mock_mode: bool,
    mock_delay: Duration,
    providers: ProviderRegistry,
    cost_tracker: Arc<CostTracker>,
}

impl LlmAdapter {
    pub fn new(config: &AdapterConfig) -> Self {
        Self {
            mock_mode: config.mock_mode,
            mock_delay: config.mock_delay,
            providers: config.providers.clone(),
            cost_tracker: Arc::clone(&config.cost_tracker),
        }
    }

    fn provider_for(&self, kind: LlmProviderKind) -> Result<Arc<dyn LlmProvider>, AdapterError> {
        if self.mock_mode || kind == LlmProviderKind::Mock {
            return Ok(Arc::new(MockLlmProvider::with_delay(self.mock_delay)));
        }
        Ok(self.providers.get(kind)?)
    }
}

#[async_trait]
impl NodeAdapter for LlmAdapter {
    fn node_type(&self) -> &'static str {
        NodeKind::AGENT_LLM
    }

    async fn execute(
        &self,
        node: &AgentNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, AdapterError> {
        let NodeKind::AgentLlm(data) = &node.kind else {
            return Err(mismatch(self.node_type(), node));
        };

        let request = CompletionRequest {
            model: data.model.clone(),
            prompt: ctx.interpolate(&data.prompt),
            temperature: data.temperature,
            max_tokens: data.max_tokens,
        };

        let provider = self.provider_for(data.provider)?;
        tracing::debug!(
            node_id = %node.id,
            provider = %data.provider,
            backend = provider.name(),
            model = %data.model,
            "Running LLM completion"
        );

        let completion = provider.complete(&request).await?;
        self.cost_tracker.record(&completion.usage);

        Ok(json!({
            "text": completion.text,
            "usage": completion.usage,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xnode_core::{LlmError, LlmNodeData, Position};

    fn node(provider: LlmProviderKind, prompt: &str) -> AgentNode {
        AgentNode {
            id: "llm".to_string(),
            position: Position::default(),
            kind: NodeKind::AgentLlm(LlmNodeData {
                provider,
                model: "gpt-4o-mini".to_string(),
                prompt: prompt.to_string(),
                temperature: 0.7,
                max_tokens: None,
            }),
        }
    }

    #[tokio::test]
    async fn test_mock_provider_interpolates_prompt() {
        let config = AdapterConfig::default();
        let adapter = LlmAdapter::new(&config);
        let mut ctx = ExecutionContext::default();
        ctx.outputs.insert("in1".to_string(), json!({"text": "hello"}));

        let out = adapter
            .execute(&node(LlmProviderKind::Mock, "Summarize: {{outputs.in1.text}}"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(
            out["text"],
            "Mock LLM response for prompt: \"Summarize: hello...\" using gpt-4o-mini"
        );
        assert_eq!(out["usage"], json!({"tokens": 150, "cost": 0.001}));
        assert_eq!(config.cost_tracker.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_mode_overrides_real_provider() {
        let adapter = LlmAdapter::new(&AdapterConfig::mock());
        let out = adapter
            .execute(&node(LlmProviderKind::Openai, "hi"), &mut ExecutionContext::default())
            .await
            .unwrap();
        assert!(out["text"].as_str().unwrap().starts_with("Mock LLM response"));
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails() {
        let adapter = LlmAdapter::new(&AdapterConfig::default());
        let err = adapter
            .execute(&node(LlmProviderKind::Anthropic, "hi"), &mut ExecutionContext::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AdapterError::Llm(LlmError::ProviderNotConfigured {
                provider: "anthropic".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_registered_provider_is_used() {
        let mut config = AdapterConfig::default();
        config.providers.register(
            LlmProviderKind::Ollama,
            Arc::new(MockLlmProvider::new()),
        );
        let adapter = LlmAdapter::new(&config);
        let out = adapter
            .execute(&node(LlmProviderKind::Ollama, "hi"), &mut ExecutionContext::default())
            .await
            .unwrap();
        assert!(out["text"].is_string());
    }
}
