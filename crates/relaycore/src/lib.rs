//! Core abstractions for the relay engine
//!
//! This crate provides the fundamental types and traits that the runtime
//! and the node library depend on: the unit contract, the shared context,
//! the hierarchical log, the cross-context envelope and the retry helper.
//! It contains no dispatch logic.

mod context;
mod error;
pub mod hook;
pub mod log;
mod node;
pub mod retry;
mod task;

pub use context::{ActiveTab, Context, SharedContext, TargetId};
pub use error::{error_chain, EngineError, LogError, NodeError, TimeoutError, TransportError};
pub use hook::{
    Destination, FailureKind, HookFailure, HookMessage, HookReply, MessageSender, NodeHookInput,
    NodeHookOutput, ProbeRequest, ProcessRole, ReadyOptions, TargetMonitor, Transport,
};
pub use log::{LogData, LogErrorDetail, LogId, LogPatch, LogRecord, LogStatus, Logger};
pub use node::{
    bool_or, millis_or, require_i64, require_input, require_str, Affinity, Dispatcher, Node,
    NodeContext, NodeKind, NodeMessages, NodeMetadata, NodeRaw, NEW_TAB,
};
pub use retry::{retry_until_timeout, DEFAULT_RETRY_INTERVAL};
pub use task::{Task, TaskData};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
