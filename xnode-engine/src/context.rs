//! Mutable state threaded through one flow run

use serde_json::Value;
use xnode_core::{JsonMap, StepLog};

/// Everything adapters can read and write during a run.
///
/// `outputs` is keyed by node id and grows as nodes complete. `logs` is
/// append-only; the executor owns the `running`/`success`/`error` entries
/// and adapters add `info` entries.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub inputs: JsonMap,
    pub outputs: JsonMap,
    pub artifacts: JsonMap,
    pub secrets: JsonMap,
    pub logs: Vec<StepLog>,
}

impl ExecutionContext {
    pub fn new(inputs: JsonMap) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }

    pub fn with_secrets(mut self, secrets: JsonMap) -> Self {
        self.secrets = secrets;
        self
    }

    /// The object graph templates resolve against. Logs are not exposed.
    pub fn template_scope(&self) -> Value {
        let mut scope = JsonMap::new();
        scope.insert("inputs".to_string(), Value::Object(self.inputs.clone()));
        scope.insert("outputs".to_string(), Value::Object(self.outputs.clone()));
        scope.insert("artifacts".to_string(), Value::Object(self.artifacts.clone()));
        scope.insert("secrets".to_string(), Value::Object(self.secrets.clone()));
        Value::Object(scope)
    }

    /// Names visible to sandboxed programs.
    pub fn sandbox_bindings(&self) -> JsonMap {
        let mut bindings = JsonMap::new();
        bindings.insert("inputs".to_string(), Value::Object(self.inputs.clone()));
        bindings.insert("outputs".to_string(), Value::Object(self.outputs.clone()));
        bindings
    }

    pub fn interpolate(&self, template: &str) -> String {
        crate::template::interpolate(template, &self.template_scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_scope_covers_context_maps() {
        let mut inputs = JsonMap::new();
        inputs.insert("q".to_string(), json!("why"));
        let mut ctx = ExecutionContext::new(inputs);
        ctx.outputs.insert("n1".to_string(), json!({"text": "t"}));
        ctx.logs.push(StepLog::info("n1", "input.text", "x"));

        let scope = ctx.template_scope();
        assert_eq!(scope["inputs"]["q"], "why");
        assert_eq!(scope["outputs"]["n1"]["text"], "t");
        assert!(scope.get("logs").is_none());
        assert_eq!(ctx.interpolate("{{inputs.q}}/{{outputs.n1.text}}"), "why/t");
    }

    #[test]
    fn test_sandbox_bindings_hide_secrets() {
        let mut secrets = JsonMap::new();
        secrets.insert("key".to_string(), json!("s3cret"));
        let ctx = ExecutionContext::default().with_secrets(secrets);
        let bindings = ctx.sandbox_bindings();
        assert!(bindings.contains_key("inputs"));
        assert!(!bindings.contains_key("secrets"));
    }
}
