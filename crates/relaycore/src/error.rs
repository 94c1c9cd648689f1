use crate::hook::Destination;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Node \"{0}\" not found")]
    UnknownNode(String),

    #[error("Node \"{0}\" already registered")]
    DuplicateRegistration(String),

    #[error("Job {node}: no active tab found, you should specify \"initUrl\"")]
    MissingInitTarget { node: String },

    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Hook error: {reason}. Does the {destination} process register node \"{node}\"?")]
    RemoteDispatch {
        node: String,
        destination: Destination,
        reason: String,
    },

    #[error("{message}: {source}")]
    UnitExecution {
        node: String,
        message: String,
        #[source]
        source: NodeError,
    },

    #[error("Invalid hook reply: {0}")]
    InvalidReply(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Name of the unit that raised this error, when known.
    pub fn node(&self) -> Option<&str> {
        match self {
            EngineError::UnknownNode(node)
            | EngineError::DuplicateRegistration(node)
            | EngineError::MissingInitTarget { node }
            | EngineError::RemoteDispatch { node, .. }
            | EngineError::UnitExecution { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Errors raised by a unit's own `execute`.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}")]
    InvalidInputType { field: String, expected: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Capability unavailable in this process: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("{destination} process reported: {message}")]
    Remote {
        destination: Destination,
        message: String,
    },

    #[error("Nested dispatch failed: {0}")]
    Dispatch(Box<EngineError>),
}

impl From<EngineError> for NodeError {
    fn from(err: EngineError) -> Self {
        NodeError::Dispatch(Box::new(err))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("Parent logger with id \"{0}\" not found")]
    ParentNotFound(String),

    #[error("Logger with id \"{0}\" already exists in this tree")]
    DuplicateId(String),

    #[error("Logger has been removed from its tree")]
    Detached,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("Timeout {timeout_ms}ms, last error: {last_error}")]
pub struct TimeoutError {
    pub timeout_ms: u64,
    pub last_error: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no listener registered for {0}")]
    NoListener(Destination),

    #[error("{0} closed the channel before replying")]
    Closed(Destination),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Renders an error and its `source()` chain, one cause per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_chain_lists_causes() {
        let err = EngineError::UnitExecution {
            node: "Echo".to_string(),
            message: "Echo failed".to_string(),
            source: NodeError::MissingInput("value".to_string()),
        };

        let chain = error_chain(&err);
        assert!(chain.starts_with("Echo failed: Missing required input: value"));
        assert!(chain.contains("caused by: Missing required input: value"));
    }

    #[test]
    fn test_remote_dispatch_names_destination() {
        let err = EngineError::RemoteDispatch {
            node: "WaitElement".to_string(),
            destination: Destination::Background,
            reason: "no listener registered for background".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Hook error: no listener registered for background. \
             Does the background process register node \"WaitElement\"?"
        );
        assert_eq!(err.node(), Some("WaitElement"));
    }
}
