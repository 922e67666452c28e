//! xnode LLM - provider seam for `agent.llm` nodes
//!
//! Provider-agnostic trait plus a registry keyed by provider kind.
//! Vendor integrations (OpenAI, Anthropic, Ollama) are supplied by the
//! embedding application and registered at startup; this crate ships only
//! the deterministic mock used in development mode and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use xnode_core::{LlmError, LlmProviderKind};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// A single prompt completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Token and cost accounting for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub tokens: u64,
    /// Estimated cost in USD.
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Trait for LLM completion backends.
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct OllamaProvider { base_url: String, client: reqwest::Client }
///
/// #[async_trait]
/// impl LlmProvider for OllamaProvider {
///     fn name(&self) -> &str { "ollama" }
///     async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
///         // POST {base_url}/api/generate
///     }
/// }
/// ```
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Run a single completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry for LLM providers.
/// Providers must be explicitly registered - no auto-discovery.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<LlmProviderKind, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: LlmProviderKind, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(kind, provider);
    }

    pub fn with_provider(mut self, kind: LlmProviderKind, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(kind, provider);
        self
    }

    /// Get the provider registered for `kind`.
    ///
    /// # Returns
    /// * `Err(LlmError::ProviderNotConfigured)` - If nothing is registered
    pub fn get(&self, kind: LlmProviderKind) -> Result<Arc<dyn LlmProvider>, LlmError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| LlmError::ProviderNotConfigured {
                provider: kind.to_string(),
            })
    }

    pub fn has(&self, kind: LlmProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Registered kinds, sorted by name.
    pub fn kinds(&self) -> Vec<LlmProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn clear(&mut self) {
        self.providers.clear();
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.kinds())
            .finish()
    }
}

// ============================================================================
// COST TRACKER
// ============================================================================

/// Tracks token usage and estimated cost across calls.
/// Thread-safe via atomic operations.
#[derive(Default)]
pub struct CostTracker {
    calls: AtomicU64,
    tokens: AtomicU64,
    /// Cost in millionths of a dollar.
    cost_micros: AtomicU64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: &Usage) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.tokens.fetch_add(usage.tokens, Ordering::Relaxed);
        let micros = (usage.cost * 1_000_000.0).round().max(0.0) as u64;
        self.cost_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    pub fn cost(&self) -> f64 {
        self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.tokens.store(0, Ordering::Relaxed);
        self.cost_micros.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("calls", &self.calls())
            .field("tokens", &self.tokens())
            .field("cost", &self.cost())
            .finish()
    }
}

// ============================================================================
// MOCK PROVIDER
// ============================================================================

/// Tokens reported by the mock for every call.
pub const MOCK_USAGE_TOKENS: u64 = 150;

/// Cost reported by the mock for every call.
pub const MOCK_USAGE_COST: f64 = 0.001;

/// Deterministic provider that never touches the network.
///
/// The delay stands in for a provider round trip and is a cancellation
/// point like any real call.
#[derive(Debug, Clone, Default)]
pub struct MockLlmProvider {
    delay: Duration,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    /// The text the mock returns for `prompt` and `model`.
    pub fn response_text(prompt: &str, model: &str) -> String {
        let preview: String = prompt.chars().take(50).collect();
        format!(
            "Mock LLM response for prompt: \"{}...\" using {}",
            preview, model
        )
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        tracing::debug!(model = %request.model, "Mock LLM completion");
        Ok(Completion {
            text: Self::response_text(&request.prompt, &request.model),
            usage: Usage {
                tokens: MOCK_USAGE_TOKENS,
                cost: MOCK_USAGE_COST,
            },
        })
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            prompt: prompt.to_string(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    #[test]
    fn test_registry_new_is_empty() {
        let registry = ProviderRegistry::new();
        assert!(registry.kinds().is_empty());
        assert!(!registry.has(LlmProviderKind::Openai));
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ProviderRegistry::new();
        registry.register(LlmProviderKind::Ollama, Arc::new(MockLlmProvider::new()));
        assert!(registry.has(LlmProviderKind::Ollama));
        assert_eq!(registry.get(LlmProviderKind::Ollama).unwrap().name(), "mock");
        assert_eq!(registry.kinds(), vec![LlmProviderKind::Ollama]);
    }

    #[test]
    fn test_registry_clear() {
        let mut registry =
            ProviderRegistry::new().with_provider(LlmProviderKind::Mock, Arc::new(MockLlmProvider::new()));
        registry.clear();
        assert!(!registry.has(LlmProviderKind::Mock));
    }

    #[tokio::test]
    async fn test_mock_response_format() {
        let provider = MockLlmProvider::new();
        let completion = provider.complete(&request("Summarize: hello")).await.unwrap();
        assert_eq!(
            completion.text,
            "Mock LLM response for prompt: \"Summarize: hello...\" using gpt-4o-mini"
        );
        assert_eq!(completion.usage.tokens, 150);
        assert_eq!(completion.usage.cost, 0.001);
    }

    #[tokio::test]
    async fn test_mock_truncates_prompt_to_fifty_chars() {
        let prompt = "x".repeat(80);
        let completion = MockLlmProvider::new().complete(&request(&prompt)).await.unwrap();
        assert!(completion.text.contains(&format!("\"{}...\"", "x".repeat(50))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_honours_delay() {
        let provider = MockLlmProvider::with_delay(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        provider.complete(&request("p")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_cost_tracker_accumulates() {
        let tracker = CostTracker::new();
        let usage = Usage {
            tokens: MOCK_USAGE_TOKENS,
            cost: MOCK_USAGE_COST,
        };
        tracker.record(&usage);
        tracker.record(&usage);
        assert_eq!(tracker.calls(), 2);
        assert_eq!(tracker.tokens(), 300);
        assert!((tracker.cost() - 0.002).abs() < 1e-9);
        tracker.reset();
        assert_eq!(tracker.tokens(), 0);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_kind() -> impl Strategy<Value = LlmProviderKind> {
        prop_oneof![
            Just(LlmProviderKind::Openai),
            Just(LlmProviderKind::Anthropic),
            Just(LlmProviderKind::Ollama),
            Just(LlmProviderKind::Mock),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// An empty registry SHALL report ProviderNotConfigured naming the kind.
        #[test]
        fn prop_registry_returns_error_when_not_configured(kind in arb_kind()) {
            let registry = ProviderRegistry::new();
            match registry.get(kind) {
                Err(LlmError::ProviderNotConfigured { provider }) => {
                    prop_assert_eq!(provider, kind.as_str());
                }
                Err(other) => prop_assert!(false, "Expected ProviderNotConfigured, got {:?}", other),
                Ok(_) => prop_assert!(false, "Expected error, got Ok"),
            }
        }

        /// The mock preview never exceeds fifty characters of the prompt.
        #[test]
        fn prop_mock_preview_is_bounded(prompt in "\\PC{0,200}", model in "[a-z0-9-]{1,20}") {
            let text = MockLlmProvider::response_text(&prompt, &model);
            let preview: String = prompt.chars().take(50).collect();
            let expected_prefix = format!("Mock LLM response for prompt: \"{}...\"", preview);
            prop_assert!(text.starts_with(&expected_prefix));
            let expected_suffix = format!(" using {}", model);
            prop_assert!(text.ends_with(&expected_suffix));
        }
    }
}
