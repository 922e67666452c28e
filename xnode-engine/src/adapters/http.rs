//! `http.request`: one outbound HTTP call per node

use super::{mismatch, NodeAdapter};
use crate::context::ExecutionContext;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use xnode_core::{AdapterError, AgentNode, HttpMethod, NodeKind};

/// Issues the request described by the node, with URL and body
/// interpolated against the context.
///
/// The response body is parsed as JSON when possible and returned as text
/// otherwise. Transport failures fail the node; non-2xx statuses do not.
#[derive(Debug, Clone)]
pub struct HttpAdapter {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// `Content-Type: application/json` unless the node overrides it.
fn headers(custom: Option<&BTreeMap<String, String>>) -> Result<HeaderMap, AdapterError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in custom.into_iter().flatten() {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| AdapterError::Http {
            reason: format!("invalid header name {}: {}", name, e),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| AdapterError::Http {
            reason: format!("invalid value for header {}: {}", name, e),
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

#[async_trait]
impl NodeAdapter for HttpAdapter {
    fn node_type(&self) -> &'static str {
        NodeKind::HTTP_REQUEST
    }

    async fn execute(
        &self,
        node: &AgentNode,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, AdapterError> {
        let NodeKind::HttpRequest(data) = &node.kind else {
            return Err(mismatch(self.node_type(), node));
        };

        let url = ctx.interpolate(&data.url);
        let mut request = self
            .client
            .request(method(data.method), &url)
            .timeout(self.timeout)
            .headers(headers(data.headers.as_ref())?);
        if data.method != HttpMethod::Get {
            if let Some(body) = data.body.as_deref().filter(|b| !b.is_empty()) {
                request = request.body(ctx.interpolate(body));
            }
        }

        tracing::debug!(node_id = %node.id, method = data.method.as_str(), %url, "Sending HTTP request");

        let response = request.send().await.map_err(|e| AdapterError::Http {
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                )
            })
            .collect();
        let text = response.text().await.map_err(|e| AdapterError::Http {
            reason: e.to_string(),
        })?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(json!({
            "status": status,
            "headers": headers,
            "body": body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xnode_core::{HttpNodeData, Position};

    #[test]
    fn test_node_headers_override_content_type() {
        let mut custom = BTreeMap::new();
        custom.insert("Content-Type".to_string(), "text/plain".to_string());
        custom.insert("X-Trace".to_string(), "abc".to_string());
        let headers = headers(Some(&custom)).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
        assert_eq!(headers["x-trace"], "abc");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_invalid_header_name_is_http_error() {
        let mut custom = BTreeMap::new();
        custom.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(headers(Some(&custom)), Err(AdapterError::Http { .. })));
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(method(HttpMethod::Get), Method::GET);
        assert_eq!(method(HttpMethod::Delete), Method::DELETE);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let node = AgentNode {
            id: "h".to_string(),
            position: Position::default(),
            kind: NodeKind::HttpRequest(HttpNodeData {
                url: "http://127.0.0.1:9/{{inputs.path}}".to_string(),
                method: HttpMethod::Post,
                headers: None,
                body: Some("{}".to_string()),
            }),
        };
        let adapter = HttpAdapter::new(Duration::from_secs(2));
        let err = adapter
            .execute(&node, &mut ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Http { .. }));
        assert!(err.to_string().starts_with("HTTP request failed: "));
    }
}
