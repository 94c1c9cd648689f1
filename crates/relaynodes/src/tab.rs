use crate::host::{wait_tab_loaded, TabHost};
use async_trait::async_trait;
use relaycore::{
    bool_or, millis_or, ActiveTab, Affinity, Node, NodeContext, NodeError, NodeMetadata,
    ReadyOptions, TargetId, NEW_TAB,
};
use relayruntime::NodeFactory;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TAB_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn tab_host(tabs: &Option<Arc<dyn TabHost>>) -> Result<&dyn TabHost, NodeError> {
    tabs.as_deref()
        .ok_or_else(|| NodeError::Unavailable("tab host".to_string()))
}

/// `tabId` from the input, or the active tab.
async fn target_tab(input: &Value, ctx: &NodeContext) -> Result<TargetId, NodeError> {
    if let Some(id) = input.get("tabId").filter(|v| !v.is_null()) {
        return id.as_i64().map(TargetId::new).ok_or_else(|| NodeError::InvalidInputType {
            field: "tabId".to_string(),
            expected: "integer".to_string(),
        });
    }

    let active = ctx.context.read().await.active_tab.id;
    if active.is_none() {
        return Err(NodeError::MissingInput("tabId".to_string()));
    }
    Ok(active)
}

/// Open a tab (or re-point the active one) and make it the task's target.
pub struct NewTabNode {
    tabs: Option<Arc<dyn TabHost>>,
}

#[async_trait]
impl Node for NewTabNode {
    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
        let tabs = tab_host(&self.tabs)?;

        let url = input.get("url").and_then(Value::as_str).unwrap_or_default();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            let reason = if url.trim().is_empty() {
                "url-empty"
            } else {
                "invalid-url"
            };
            return Err(NodeError::ExecutionFailed(reason.to_string()));
        }

        let active = bool_or(&input, "active", true);
        let current = ctx.context.read().await.active_tab.id;
        let tab = if bool_or(&input, "updatePrevTab", false) && !current.is_none() {
            tabs.update(current, url, active).await?
        } else {
            tabs.create(url, active).await?
        };
        tracing::info!("Opened {} in tab {}", url, tab.id);

        ctx.context.write().await.active_tab = ActiveTab {
            id: tab.id,
            url: url.to_string(),
        };

        if bool_or(&input, "waitTabLoaded", false) {
            let timeout = match millis_or(&input, "tabLoadTimeout", 0) {
                t if t.is_zero() => DEFAULT_TAB_LOAD_TIMEOUT,
                t => t,
            };
            wait_tab_loaded(
                tabs,
                tab.id,
                ReadyOptions {
                    timeout,
                    fail_on_error: true,
                },
            )
            .await?;
        }

        Ok(json!({ "url": url, "tabId": tab.id }))
    }
}

pub struct NewTabNodeFactory {
    pub(crate) tabs: Option<Arc<dyn TabHost>>,
}

impl NodeFactory for NewTabNodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(NewTabNode {
            tabs: self.tabs.clone(),
        }))
    }

    fn metadata(&self) -> Option<NodeMetadata> {
        Some(
            NodeMetadata::new(NEW_TAB, "Create a new tab").with_messages(
                "Opening tab",
                "Open tab successfully",
                "Open tab failed",
            ),
        )
    }
}

/// Close tabs; the task is left without a target.
pub struct CloseTabNode {
    tabs: Option<Arc<dyn TabHost>>,
}

#[async_trait]
impl Node for CloseTabNode {
    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
        let tabs = tab_host(&self.tabs)?;

        let ids: Vec<TargetId> = match input.get("tabIds").and_then(Value::as_array) {
            Some(ids) => ids
                .iter()
                .map(|id| {
                    id.as_i64().map(TargetId::new).ok_or_else(|| NodeError::InvalidInputType {
                        field: "tabIds".to_string(),
                        expected: "array of integers".to_string(),
                    })
                })
                .collect::<Result<_, _>>()?,
            None => vec![target_tab(&input, &ctx).await?],
        };

        tabs.remove(&ids).await?;
        ctx.context.write().await.active_tab.id = TargetId::NONE;

        Ok(json!({ "tabIds": ids }))
    }
}

pub struct CloseTabNodeFactory {
    pub(crate) tabs: Option<Arc<dyn TabHost>>,
}

impl NodeFactory for CloseTabNodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(CloseTabNode {
            tabs: self.tabs.clone(),
        }))
    }

    fn metadata(&self) -> Option<NodeMetadata> {
        Some(NodeMetadata::new("CloseTab", "Close tabs"))
    }
}

pub struct ReloadTabNode {
    tabs: Option<Arc<dyn TabHost>>,
}

#[async_trait]
impl Node for ReloadTabNode {
    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
        let tabs = tab_host(&self.tabs)?;
        let tab = target_tab(&input, &ctx).await?;

        tabs.reload(tab).await?;
        Ok(json!({ "tabId": tab }))
    }
}

pub struct ReloadTabNodeFactory {
    pub(crate) tabs: Option<Arc<dyn TabHost>>,
}

impl NodeFactory for ReloadTabNodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ReloadTabNode {
            tabs: self.tabs.clone(),
        }))
    }

    fn metadata(&self) -> Option<NodeMetadata> {
        Some(NodeMetadata::new("ReloadTab", "Reload a tab"))
    }
}
