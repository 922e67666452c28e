//! Flow graphs: the unit of work carried inside a task envelope
//!
//! A [`Flow`] is the caller-supplied wire form. Node payloads stay as raw
//! JSON ([`RawNode`]) until they are parsed into the typed [`NodeKind`]
//! union, which happens once when the flow is validated.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Version assigned to flows that do not declare one.
pub const DEFAULT_FLOW_VERSION: &str = "0.1.0";

fn default_flow_version() -> String {
    DEFAULT_FLOW_VERSION.to_string()
}

// ============================================================================
// WIRE FORM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<RawNode>,
    pub edges: Vec<FlowEdge>,
    #[serde(default = "default_flow_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Flow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            version: default_flow_version(),
            metadata: None,
        }
    }

    pub fn with_node(mut self, node: RawNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append an edge with a generated id.
    pub fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let id = format!("e{}", self.edges.len() + 1);
        self.edges.push(FlowEdge::new(id, source, target));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A node as received: type tag plus untyped payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Value,
}

impl RawNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            data,
        }
    }

    /// The payload with a missing or null `data` read as an empty object.
    pub fn data_or_empty(&self) -> Value {
        if self.data.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.data.clone()
        }
    }
}

/// Editor coordinates. Ignored by execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl FlowEdge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }
}

// ============================================================================
// TYPED NODES
// ============================================================================

/// A node whose payload has been parsed against its declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentNode {
    pub id: String,
    pub position: Position,
    pub kind: NodeKind,
}

impl AgentNode {
    pub fn from_raw(raw: &RawNode) -> Result<Self, ValidationError> {
        Ok(Self {
            id: raw.id.clone(),
            position: raw.position,
            kind: NodeKind::parse(&raw.id, &raw.node_type, &raw.data_or_empty())?,
        })
    }

    pub fn node_type(&self) -> &'static str {
        self.kind.type_tag()
    }
}

/// The fixed set of node types, each with its own payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    InputText(InputTextData),
    AgentLlm(LlmNodeData),
    HttpRequest(HttpNodeData),
    OutputText(OutputTextData),
    TransformJs(TransformData),
    LogicIf(LogicData),
}

impl NodeKind {
    pub const INPUT_TEXT: &'static str = "input.text";
    pub const AGENT_LLM: &'static str = "agent.llm";
    pub const HTTP_REQUEST: &'static str = "http.request";
    pub const OUTPUT_TEXT: &'static str = "output.text";
    pub const TRANSFORM_JS: &'static str = "transform.js";
    pub const LOGIC_IF: &'static str = "logic.if";

    pub const ALL_TYPES: [&'static str; 6] = [
        Self::INPUT_TEXT,
        Self::AGENT_LLM,
        Self::HTTP_REQUEST,
        Self::OUTPUT_TEXT,
        Self::TRANSFORM_JS,
        Self::LOGIC_IF,
    ];

    pub fn type_tag(&self) -> &'static str {
        match self {
            NodeKind::InputText(_) => Self::INPUT_TEXT,
            NodeKind::AgentLlm(_) => Self::AGENT_LLM,
            NodeKind::HttpRequest(_) => Self::HTTP_REQUEST,
            NodeKind::OutputText(_) => Self::OUTPUT_TEXT,
            NodeKind::TransformJs(_) => Self::TRANSFORM_JS,
            NodeKind::LogicIf(_) => Self::LOGIC_IF,
        }
    }

    /// Parse `data` against the schema for `node_type`.
    pub fn parse(node_id: &str, node_type: &str, data: &Value) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidNode {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            reason,
        };

        let kind = match node_type {
            Self::INPUT_TEXT => NodeKind::InputText(payload(data).map_err(invalid)?),
            Self::AGENT_LLM => {
                let llm: LlmNodeData = payload(data).map_err(invalid)?;
                if !(0.0..=2.0).contains(&llm.temperature) {
                    return Err(invalid(format!(
                        "temperature {} outside [0, 2]",
                        llm.temperature
                    )));
                }
                if llm.max_tokens == Some(0) {
                    return Err(invalid("maxTokens must be positive".to_string()));
                }
                NodeKind::AgentLlm(llm)
            }
            Self::HTTP_REQUEST => NodeKind::HttpRequest(payload(data).map_err(invalid)?),
            Self::OUTPUT_TEXT => NodeKind::OutputText(payload(data).map_err(invalid)?),
            Self::TRANSFORM_JS => NodeKind::TransformJs(payload(data).map_err(invalid)?),
            Self::LOGIC_IF => NodeKind::LogicIf(payload(data).map_err(invalid)?),
            other => {
                return Err(ValidationError::UnknownNodeType {
                    node_id: node_id.to_string(),
                    node_type: other.to_string(),
                })
            }
        };
        Ok(kind)
    }
}

fn payload<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, String> {
    serde_json::from_value(data.clone()).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputTextData {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub input_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Openai,
    Anthropic,
    Ollama,
    Mock,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::Openai => "openai",
            LlmProviderKind::Anthropic => "anthropic",
            LlmProviderKind::Ollama => "ollama",
            LlmProviderKind::Mock => "mock",
        }
    }
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_temperature() -> f64 {
    0.7
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmNodeData {
    pub provider: LlmProviderKind,
    pub model: String,
    pub prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpNodeData {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_output_template() -> String {
    "{{input}}".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTextData {
    #[serde(default = "default_output_template")]
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformData {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicData {
    pub condition: String,
}
