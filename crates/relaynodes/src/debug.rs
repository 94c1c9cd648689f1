use async_trait::async_trait;
use relaycore::{Affinity, Node, NodeContext, NodeError, NodeMetadata};
use relayruntime::NodeFactory;
use serde_json::Value;

/// Returns its `value` input; handy for checking where a task runs
pub struct EchoNode;

#[async_trait]
impl Node for EchoNode {
    fn affinity(&self) -> Affinity {
        Affinity::Universal
    }

    async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
        let value = input.get("value").cloned().unwrap_or(Value::Null);
        tracing::debug!("ECHO [{}]: {}", ctx.name, value);
        Ok(value)
    }
}

pub struct EchoNodeFactory;

impl NodeFactory for EchoNodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(EchoNode))
    }

    fn metadata(&self) -> Option<NodeMetadata> {
        Some(NodeMetadata::new("Echo", "Returns its input value"))
    }
}
