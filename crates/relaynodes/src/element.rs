use crate::host::{Element, ElementQuery, Page};
use async_trait::async_trait;
use relaycore::{
    millis_or, retry_until_timeout, Affinity, Node, NodeContext, NodeError, NodeKind,
    NodeMetadata, DEFAULT_RETRY_INTERVAL,
};
use relayruntime::NodeFactory;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

fn page(page: &Option<Arc<dyn Page>>) -> Result<&dyn Page, NodeError> {
    page.as_deref()
        .ok_or_else(|| NodeError::Unavailable("page".to_string()))
}

/// Poll the page until the query matches at least one element.
pub struct WaitElementNode {
    page: Option<Arc<dyn Page>>,
}

#[async_trait]
impl Node for WaitElementNode {
    fn affinity(&self) -> Affinity {
        Affinity::Content
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Job
    }

    async fn execute(&self, input: Value, _ctx: NodeContext) -> Result<Value, NodeError> {
        let page = page(&self.page)?;
        let query = ElementQuery::from_input(&input)?;
        let timeout = millis_or(&input, "timeout", DEFAULT_WAIT_TIMEOUT_MS);

        let query = &query;
        let elements = retry_until_timeout(
            move || async move {
                let found = page.query(query).await.map_err(|e| e.to_string())?;
                if found.is_empty() {
                    Err(format!("Element {} not found", query))
                } else {
                    Ok(found)
                }
            },
            timeout,
            DEFAULT_RETRY_INTERVAL,
        )
        .await?;

        tracing::debug!("Found {} element(s) {}", elements.len(), query);
        serde_json::to_value(elements).map_err(|e| NodeError::ExecutionFailed(e.to_string()))
    }
}

pub struct WaitElementNodeFactory {
    pub(crate) page: Option<Arc<dyn Page>>,
}

impl NodeFactory for WaitElementNodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(WaitElementNode {
            page: self.page.clone(),
        }))
    }

    fn metadata(&self) -> Option<NodeMetadata> {
        Some(
            NodeMetadata::new("WaitElement", "Wait for element").with_messages(
                "Waiting for element",
                "Found element",
                "Element not found",
            ),
        )
    }
}

/// Wait for an element, then click the first match.
pub struct ClickElementNode {
    page: Option<Arc<dyn Page>>,
}

#[async_trait]
impl Node for ClickElementNode {
    fn affinity(&self) -> Affinity {
        Affinity::Content
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Job
    }

    async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
        let page = page(&self.page)?;

        let found = ctx.execute_node("WaitElement", input).await?;
        let elements: Vec<Element> = serde_json::from_value(found)
            .map_err(|e| NodeError::ExecutionFailed(format!("Unexpected WaitElement output: {}", e)))?;

        match elements.into_iter().next() {
            Some(element) => {
                page.click(&element).await?;
                serde_json::to_value(&element)
                    .map_err(|e| NodeError::ExecutionFailed(e.to_string()))
            }
            None => Ok(Value::Null),
        }
    }
}

pub struct ClickElementNodeFactory {
    pub(crate) page: Option<Arc<dyn Page>>,
}

impl NodeFactory for ClickElementNodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ClickElementNode {
            page: self.page.clone(),
        }))
    }

    fn metadata(&self) -> Option<NodeMetadata> {
        Some(
            NodeMetadata::new("ClickElement", "Click an element").with_messages(
                "ClickElement pending",
                "ClickElement successfully",
                "ClickElement failed",
            ),
        )
    }
}
