//! Flow Validator
//!
//! Structural and per-node checks run before anything executes. Every
//! check collects errors instead of stopping at the first, so callers see
//! the whole list at once. Acyclicity is not checked here; the executor
//! finds cycles during its topological pass.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use xnode_core::{AgentNode, Flow, FlowEdge, NodeKind, RawNode, ValidationError};

/// Outcome of validating a flow. `valid` iff `errors` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn from_parts(errors: Vec<ValidationError>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors: errors.iter().map(ToString::to_string).collect(),
            warnings,
        }
    }
}

/// A flow that passed validation, with every node payload typed.
///
/// Only the validator constructs these, so anything holding one has
/// already been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFlow {
    id: String,
    nodes: Vec<AgentNode>,
    edges: Vec<FlowEdge>,
    warnings: Vec<String>,
}

impl ValidatedFlow {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nodes(&self) -> &[AgentNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Validate caller-supplied JSON. A value that does not have the flow
/// shape yields a single `Invalid flow structure` error.
pub fn validate_value(value: &Value) -> ValidationReport {
    match serde_json::from_value::<Flow>(value.clone()) {
        Ok(flow) => validate(&flow),
        Err(e) => ValidationReport::from_parts(
            vec![ValidationError::InvalidStructure {
                reason: e.to_string(),
            }],
            Vec::new(),
        ),
    }
}

pub fn validate(flow: &Flow) -> ValidationReport {
    let checked = check(flow);
    ValidationReport::from_parts(checked.errors, checked.warnings)
}

/// Validate and, on success, hand back the typed flow.
///
/// # Errors
/// `ValidationError::Rejected` carrying the full error list.
pub fn validate_flow(flow: &Flow) -> Result<ValidatedFlow, ValidationError> {
    let checked = check(flow);
    if !checked.errors.is_empty() {
        return Err(ValidationError::Rejected {
            errors: checked.errors.iter().map(ToString::to_string).collect(),
        });
    }
    Ok(ValidatedFlow {
        id: flow.id.clone(),
        nodes: checked.nodes,
        edges: flow.edges.clone(),
        warnings: checked.warnings,
    })
}

/// Same as [`validate_flow`] for a flow still in JSON form.
pub fn validate_flow_value(value: &Value) -> Result<ValidatedFlow, ValidationError> {
    let flow: Flow =
        serde_json::from_value(value.clone()).map_err(|e| ValidationError::Rejected {
            errors: vec![ValidationError::InvalidStructure {
                reason: e.to_string(),
            }
            .to_string()],
        })?;
    validate_flow(&flow)
}

struct Checked {
    errors: Vec<ValidationError>,
    warnings: Vec<String>,
    nodes: Vec<AgentNode>,
}

fn check(flow: &Flow) -> Checked {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut nodes = Vec::with_capacity(flow.nodes.len());

    // Node payloads against their declared types
    for raw in &flow.nodes {
        match AgentNode::from_raw(raw) {
            Ok(node) => nodes.push(node),
            Err(e) => errors.push(e),
        }
    }

    let mut ids = HashSet::with_capacity(flow.nodes.len());
    for raw in &flow.nodes {
        if !ids.insert(raw.id.as_str()) {
            errors.push(ValidationError::DuplicateNode {
                node_id: raw.id.clone(),
            });
        }
    }

    // Edge endpoints
    for edge in &flow.edges {
        if !ids.contains(edge.source.as_str()) {
            errors.push(ValidationError::MissingSource {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            });
        }
        if !ids.contains(edge.target.as_str()) {
            errors.push(ValidationError::MissingTarget {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
            });
        }
    }

    // Isolated nodes
    if flow.nodes.len() > 1 {
        let connected: HashSet<&str> = flow
            .edges
            .iter()
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .collect();
        for raw in &flow.nodes {
            if !connected.contains(raw.id.as_str()) {
                warnings.push(format!(
                    "Node {} is not connected to any other nodes",
                    raw.id
                ));
            }
        }
    }

    // Type-specific requirements, read from the raw payload so they apply
    // even when the typed parse above failed
    for raw in &flow.nodes {
        errors.extend(required_fields(raw));
    }

    Checked {
        errors,
        warnings,
        nodes,
    }
}

fn str_field<'a>(raw: &'a RawNode, name: &str) -> &'a str {
    raw.data
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn required_fields(raw: &RawNode) -> Option<ValidationError> {
    let field = |name: &str| str_field(raw, name);

    match raw.node_type.as_str() {
        NodeKind::AGENT_LLM if field("model").is_empty() || field("prompt").is_empty() => {
            Some(ValidationError::LlmMissingFields {
                node_id: raw.id.clone(),
            })
        }
        NodeKind::HTTP_REQUEST if Url::parse(field("url")).is_err() => {
            Some(ValidationError::InvalidUrl {
                node_id: raw.id.clone(),
                url: field("url").to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(id: &str) -> RawNode {
        RawNode::new(id, NodeKind::INPUT_TEXT, json!({}))
    }

    fn output(id: &str) -> RawNode {
        RawNode::new(id, NodeKind::OUTPUT_TEXT, json!({"template": "{{outputs.a.text}}"}))
    }

    #[test]
    fn test_valid_flow() {
        let flow = Flow::new("f", "ok")
            .with_node(input("a"))
            .with_node(output("b"))
            .with_edge("a", "b");
        let report = validate(&flow);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_single_node_is_not_isolated() {
        let report = validate(&Flow::new("f", "one").with_node(input("a")));
        assert!(report.valid);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_isolated_node_is_warning_only() {
        let flow = Flow::new("f", "w")
            .with_node(input("a"))
            .with_node(output("b"))
            .with_node(input("c"))
            .with_edge("a", "b");
        let report = validate(&flow);
        assert!(report.valid);
        assert_eq!(
            report.warnings,
            vec!["Node c is not connected to any other nodes".to_string()]
        );
    }

    #[test]
    fn test_missing_edge_endpoints() {
        let flow = Flow::new("f", "bad")
            .with_node(input("a"))
            .with_edge("a", "ghost")
            .with_edge("phantom", "a");
        let report = validate(&flow);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("non-existent target node: ghost"));
        assert!(report.errors[1].contains("non-existent source node: phantom"));
    }

    #[test]
    fn test_llm_missing_prompt() {
        let flow = Flow::new("f", "llm").with_node(RawNode::new(
            "l",
            NodeKind::AGENT_LLM,
            json!({"provider": "mock", "model": "m", "prompt": ""}),
        ));
        let report = validate(&flow);
        assert!(!report.valid);
        assert_eq!(
            report.errors,
            vec!["LLM node l missing required model or prompt".to_string()]
        );
    }

    #[test]
    fn test_http_invalid_url() {
        let flow = Flow::new("f", "http").with_node(RawNode::new(
            "h",
            NodeKind::HTTP_REQUEST,
            json!({"url": "not a url"}),
        ));
        let report = validate(&flow);
        assert_eq!(report.errors, vec!["HTTP node h has invalid URL: not a url".to_string()]);
    }

    #[test]
    fn test_collects_one_error_per_bad_node() {
        let flow = Flow::new("f", "many")
            .with_node(RawNode::new("x", "image.generate", json!({})))
            .with_node(RawNode::new("t", NodeKind::TRANSFORM_JS, json!({})))
            .with_node(input("ok"))
            .with_edge("x", "t")
            .with_edge("t", "ok");
        let report = validate(&flow);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("unknown type: image.generate"));
        assert!(report.errors[1].contains("Node t (transform.js)"));
    }

    #[test]
    fn test_duplicate_ids() {
        let flow = Flow::new("f", "dup")
            .with_node(input("a"))
            .with_node(input("a"))
            .with_edge("a", "a");
        let report = validate(&flow);
        assert!(report.errors.iter().any(|e| e == "Duplicate node id: a"));
    }

    #[test]
    fn test_validate_value_bad_shape() {
        let report = validate_value(&json!({"id": "f", "nodes": []}));
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Invalid flow structure: "));
    }

    #[test]
    fn test_validate_flow_returns_typed_nodes() {
        let flow = Flow::new("f", "ok")
            .with_node(input("a"))
            .with_node(output("b"))
            .with_edge("a", "b");
        let validated = validate_flow(&flow).unwrap();
        assert_eq!(validated.id(), "f");
        assert_eq!(validated.nodes().len(), 2);
        assert_eq!(validated.nodes()[1].node_type(), NodeKind::OUTPUT_TEXT);
    }

    #[test]
    fn test_validate_flow_rejection_carries_errors() {
        let flow = Flow::new("f", "bad").with_node(input("a")).with_edge("a", "b");
        match validate_flow(&flow) {
            Err(ValidationError::Rejected { errors }) => {
                assert_eq!(errors, vec!["Edge e1 references non-existent target node: b".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cycles_pass_validation() {
        let flow = Flow::new("f", "loop")
            .with_node(input("a"))
            .with_node(input("b"))
            .with_edge("a", "b")
            .with_edge("b", "a");
        assert!(validate(&flow).valid);
    }
}
