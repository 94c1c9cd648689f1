use crate::{NodeMessages, NodeMetadata, NodeRaw};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named, ordered list of units run on one shared context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TaskDescriptor")]
pub struct Task {
    #[serde(flatten)]
    pub metadata: NodeMetadata,
    pub data: TaskData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub nodes: Vec<NodeRaw>,
    /// Milliseconds to wait before each step.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delay: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Task as written by hand: everything but the name is optional.
#[derive(Deserialize)]
struct TaskDescriptor {
    name: String,
    description: Option<String>,
    message: Option<NodeMessages>,
    #[serde(default)]
    data: TaskData,
}

impl From<TaskDescriptor> for Task {
    fn from(descriptor: TaskDescriptor) -> Self {
        let mut metadata = NodeMetadata::named(descriptor.name);
        if let Some(description) = descriptor.description {
            metadata.description = description;
        }
        if let Some(message) = descriptor.message {
            metadata.message = message;
        }
        Task {
            metadata,
            data: descriptor.data,
        }
    }
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: NodeMetadata::named(name),
            data: TaskData::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.data.delay = delay_ms;
        self
    }

    pub fn step(mut self, name: impl Into<String>, data: Value) -> Self {
        self.data.nodes.push(NodeRaw::new(name, data));
        self
    }

    pub fn add_node(&mut self, node: NodeRaw) {
        self.data.nodes.push(node);
    }
}
