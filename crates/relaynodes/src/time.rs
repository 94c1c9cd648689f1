use async_trait::async_trait;
use relaycore::{millis_or, Affinity, Node, NodeContext, NodeError, NodeMetadata};
use relayruntime::NodeFactory;
use serde_json::Value;
use tokio::time::sleep;

/// Wait for `ms` milliseconds, then pass the input through
pub struct SleepNode;

#[async_trait]
impl Node for SleepNode {
    fn affinity(&self) -> Affinity {
        Affinity::Universal
    }

    async fn execute(&self, input: Value, _ctx: NodeContext) -> Result<Value, NodeError> {
        // Default to 1 second if not specified
        let duration = millis_or(&input, "ms", 1000);

        tracing::debug!("Sleeping for {:?}", duration);
        sleep(duration).await;

        Ok(input)
    }
}

pub struct SleepNodeFactory;

impl NodeFactory for SleepNodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(SleepNode))
    }

    fn metadata(&self) -> Option<NodeMetadata> {
        Some(NodeMetadata::new("Sleep", "Delay execution for specified milliseconds"))
    }
}
