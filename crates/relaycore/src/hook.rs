//! Cross-context envelope and the transport seams the engine talks through.

use crate::log::LogRecord;
use crate::{Context, EngineError, NodeError, NodeRaw, TargetId, TimeoutError, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Role of the process an engine runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Background,
    Content,
    /// Transient UI process that may be torn down mid-operation.
    Popup,
    /// Standalone process without any peers.
    Web,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Background => write!(f, "background"),
            ProcessRole::Content => write!(f, "content"),
            ProcessRole::Popup => write!(f, "popup"),
            ProcessRole::Web => write!(f, "web"),
        }
    }
}

/// Where a forwarded unit is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Background,
    /// The content process injected into a tab.
    Target(TargetId),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Background => write!(f, "background"),
            Destination::Target(id) => write!(f, "content (tab {})", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHookInput {
    pub node_raw: NodeRaw,
    pub context: Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeRequest {
    /// Ask the receiver which tab the sender belongs to.
    GetCurrentTabId,
}

/// Message sent from one process to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum HookMessage {
    Node(NodeHookInput),
    Probe(ProbeRequest),
}

impl HookMessage {
    pub fn node(node_raw: NodeRaw, context: Context) -> Self {
        HookMessage::Node(NodeHookInput { node_raw, context })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHookOutput {
    pub output: Value,
    /// Export of the remote root logger; its first child is the remote
    /// record of the dispatched unit.
    pub log_data: LogRecord,
    pub context: Context,
}

/// What went wrong on the remote side, so the caller can rebuild the error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The receiving process has no unit registered under that name.
    UnknownNode,
    MissingInitTarget,
    Timeout,
    #[default]
    Unit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookFailure {
    pub message: String,
    #[serde(default)]
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_data: Option<LogRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

impl HookFailure {
    /// Describe `error`, raised while running a forwarded unit.
    pub fn from_error(error: &EngineError) -> Self {
        let (kind, timeout) = match error {
            EngineError::UnknownNode(_) => (FailureKind::UnknownNode, None),
            EngineError::MissingInitTarget { .. } => (FailureKind::MissingInitTarget, None),
            EngineError::Timeout(timeout) => (FailureKind::Timeout, Some(timeout.clone())),
            _ => (FailureKind::Unit, None),
        };
        Self {
            message: error.to_string(),
            kind,
            timeout,
            log_data: None,
            context: None,
        }
    }

    /// Rebuild the error the remote side raised for `node`, sent to
    /// `destination`. `unit_message` is the unit's declared error message.
    pub fn into_error(self, node: &str, destination: Destination, unit_message: &str) -> EngineError {
        match (self.kind, self.timeout) {
            (FailureKind::UnknownNode, _) => EngineError::RemoteDispatch {
                node: node.to_string(),
                destination,
                reason: self.message,
            },
            (FailureKind::MissingInitTarget, _) => EngineError::MissingInitTarget {
                node: node.to_string(),
            },
            (FailureKind::Timeout, Some(timeout)) => EngineError::Timeout(timeout),
            _ => EngineError::UnitExecution {
                node: node.to_string(),
                message: unit_message.to_string(),
                source: NodeError::Remote {
                    destination,
                    message: self.message,
                },
            },
        }
    }
}

/// Reply to a [`HookMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum HookReply {
    Node(NodeHookOutput),
    TabId(TargetId),
    Failed(HookFailure),
}

impl HookReply {
    pub fn failed(message: impl Into<String>) -> Self {
        HookReply::Failed(HookFailure {
            message: message.into(),
            kind: FailureKind::Unit,
            timeout: None,
            log_data: None,
            context: None,
        })
    }
}

/// Identity of the process a message came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    /// Set when the sender is a content process injected into a tab.
    pub tab: Option<TargetId>,
}

/// Send a message to another process and await its reply.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        destination: Destination,
        message: HookMessage,
    ) -> Result<HookReply, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyOptions {
    pub timeout: Duration,
    /// Fail on navigation errors instead of waiting them out.
    pub fail_on_error: bool,
}

impl Default for ReadyOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            fail_on_error: false,
        }
    }
}

/// Readiness probe for tabs.
#[async_trait]
pub trait TargetMonitor: Send + Sync {
    async fn wait_until_ready(&self, target: TargetId, options: ReadyOptions) -> Result<(), NodeError>;
}
