use crate::{EngineError, Logger, NodeError, SharedContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Name of the reserved unit that opens (or re-points) the active tab.
pub const NEW_TAB: &str = "NewTab";

/// Execution context a unit must run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    /// Privileged process with access to tab lifecycle APIs.
    Background,
    /// Process injected into the active tab.
    Content,
    /// Runs wherever it is dispatched.
    Universal,
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Affinity::Background => write!(f, "background"),
            Affinity::Content => write!(f, "content"),
            Affinity::Universal => write!(f, "universal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Block,
    /// Content jobs need an active tab and get one bootstrapped from `initUrl`.
    Job,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMessages {
    pub pending: String,
    pub success: String,
    pub error: String,
}

/// Static description of a unit, used only for log text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub name: String,
    pub description: String,
    pub message: NodeMessages,
}

impl NodeMetadata {
    /// Default metadata derived from a unit name.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            message: NodeMessages {
                pending: format!("Node {} is executing", name),
                success: format!("Node {} executed successfully", name),
                error: format!("Node {} failed to execute", name),
            },
            name,
        }
    }

    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let mut metadata = Self::named(name);
        metadata.description = description.into();
        metadata
    }

    pub fn with_messages(
        mut self,
        pending: impl Into<String>,
        success: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        self.message = NodeMessages {
            pending: pending.into(),
            success: success.into(),
            error: error.into(),
        };
        self
    }
}

/// Work-unit descriptor: registry key plus opaque input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRaw {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl NodeRaw {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Reserved `delay` field, in milliseconds.
    pub fn delay(&self) -> Option<Duration> {
        self.data
            .get("delay")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Reserved `initUrl` field used to bootstrap a tab for content jobs.
    pub fn init_url(&self) -> Option<&str> {
        self.data
            .get("initUrl")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
    }
}

/// Core trait that all executable units implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Context the unit must run in
    fn affinity(&self) -> Affinity;

    fn kind(&self) -> NodeKind {
        NodeKind::Block
    }

    /// Run the unit against its input
    async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError>;
}

/// Dispatch capability handed to running units so they can run nested units.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        node_raw: NodeRaw,
        logger: Logger,
        context: SharedContext,
    ) -> Result<Value, EngineError>;

    async fn dispatch_sequence(
        &self,
        node_raws: Vec<NodeRaw>,
        logger: Logger,
        context: SharedContext,
        delay: Duration,
    ) -> Result<Vec<Value>, EngineError>;

    async fn dispatch_concurrent(
        &self,
        node_raws: Vec<NodeRaw>,
        logger: Logger,
        context: SharedContext,
    ) -> Result<Vec<Value>, EngineError>;
}

/// What a running unit is bound to
#[derive(Clone)]
pub struct NodeContext {
    /// Registered name of the running unit
    pub name: String,

    /// The unit's own (pending) log record
    pub logger: Logger,

    /// Shared task state
    pub context: SharedContext,

    pub dispatcher: Arc<dyn Dispatcher>,
}

impl NodeContext {
    /// Run a nested unit; its record becomes a child of this unit's record.
    pub async fn execute_node(
        &self,
        name: impl Into<String>,
        input: Value,
    ) -> Result<Value, EngineError> {
        self.dispatcher
            .dispatch(
                NodeRaw::new(name, input),
                self.logger.clone(),
                Arc::clone(&self.context),
            )
            .await
    }

    pub async fn execute_nodes(
        &self,
        node_raws: Vec<NodeRaw>,
        delay: Duration,
    ) -> Result<Vec<Value>, EngineError> {
        self.dispatcher
            .dispatch_sequence(node_raws, self.logger.clone(), Arc::clone(&self.context), delay)
            .await
    }

    pub async fn execute_concurrent_nodes(
        &self,
        node_raws: Vec<NodeRaw>,
    ) -> Result<Vec<Value>, EngineError> {
        self.dispatcher
            .dispatch_concurrent(node_raws, self.logger.clone(), Arc::clone(&self.context))
            .await
    }
}

/// Get required input field or return error
pub fn require_input<'a>(input: &'a Value, name: &str) -> Result<&'a Value, NodeError> {
    input
        .get(name)
        .filter(|value| !value.is_null())
        .ok_or_else(|| NodeError::MissingInput(name.to_string()))
}

pub fn require_str<'a>(input: &'a Value, name: &str) -> Result<&'a str, NodeError> {
    require_input(input, name)?
        .as_str()
        .ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
        })
}

pub fn require_i64(input: &Value, name: &str) -> Result<i64, NodeError> {
    require_input(input, name)?
        .as_i64()
        .ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "integer".to_string(),
        })
}

/// Optional boolean field with default
pub fn bool_or(input: &Value, name: &str, default: bool) -> bool {
    input.get(name).and_then(Value::as_bool).unwrap_or(default)
}

/// Optional millisecond field with default
pub fn millis_or(input: &Value, name: &str, default: u64) -> Duration {
    Duration::from_millis(input.get(name).and_then(Value::as_u64).unwrap_or(default))
}
