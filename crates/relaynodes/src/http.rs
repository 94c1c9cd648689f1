use async_trait::async_trait;
use relaycore::{require_str, Affinity, Node, NodeContext, NodeError, NodeMetadata};
use relayruntime::NodeFactory;
use serde_json::{json, Map, Value};

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    async fn execute(&self, input: Value, _ctx: NodeContext) -> Result<Value, NodeError> {
        let url = require_str(&input, "url")?;
        let method = input.get("method").and_then(Value::as_str).unwrap_or("GET");

        tracing::info!("{} {}", method, url);

        let body = input.get("body").filter(|body| !body.is_null());
        let request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => match body {
                Some(Value::String(text)) => self.client.post(url).body(text.clone()),
                Some(json) => self.client.post(url).json(json),
                None => self.client.post(url),
            },
            "PUT" => match body {
                Some(json) => self.client.put(url).json(json),
                None => self.client.put(url),
            },
            "DELETE" => self.client.delete(url),
            _ => {
                return Err(NodeError::Configuration(format!(
                    "Unsupported method: {}",
                    method
                )))
            }
        };

        // Add headers if provided
        let request = match input.get("headers") {
            Some(Value::Object(headers)) => headers.iter().fold(request, |req, (key, value)| {
                match value.as_str() {
                    Some(value) => req.header(key.as_str(), value),
                    None => req,
                }
            }),
            _ => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        tracing::info!("Response status: {}", status);

        Ok(json!({
            "status": status,
            "body": body,
            "headers": headers,
        }))
    }
}

pub struct HttpRequestNodeFactory {
    client: reqwest::Client,
}

impl HttpRequestNodeFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNodeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(HttpRequestNode::new(self.client.clone())))
    }

    fn metadata(&self) -> Option<NodeMetadata> {
        Some(NodeMetadata::new("HttpRequest", "Make HTTP requests"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore::{Context, Dispatcher, EngineError, Logger, NodeRaw, SharedContext};
    use std::sync::Arc;
    use std::time::Duration;

    struct NoDispatch;

    #[async_trait]
    impl Dispatcher for NoDispatch {
        async fn dispatch(
            &self,
            node_raw: NodeRaw,
            _logger: Logger,
            _context: SharedContext,
        ) -> Result<Value, EngineError> {
            Err(EngineError::UnknownNode(node_raw.name))
        }

        async fn dispatch_sequence(
            &self,
            _node_raws: Vec<NodeRaw>,
            _logger: Logger,
            _context: SharedContext,
            _delay: Duration,
        ) -> Result<Vec<Value>, EngineError> {
            Ok(Vec::new())
        }

        async fn dispatch_concurrent(
            &self,
            _node_raws: Vec<NodeRaw>,
            _logger: Logger,
            _context: SharedContext,
        ) -> Result<Vec<Value>, EngineError> {
            Ok(Vec::new())
        }
    }

    fn ctx() -> NodeContext {
        NodeContext {
            name: "HttpRequest".to_string(),
            logger: Logger::root(),
            context: Context::new().shared(),
            dispatcher: Arc::new(NoDispatch),
        }
    }

    #[tokio::test]
    async fn test_missing_url() {
        let node = HttpRequestNodeFactory::new().create().unwrap();
        let err = node.execute(json!({}), ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::MissingInput(field) if field == "url"));
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let node = HttpRequestNodeFactory::new().create().unwrap();
        let err = node
            .execute(json!({ "url": "http://localhost", "method": "PATCH" }), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Configuration(_)));
    }
}
