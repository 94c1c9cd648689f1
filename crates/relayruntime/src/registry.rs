use relaycore::{EngineError, Node, NodeError, NodeMetadata};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating unit instances
pub trait NodeFactory: Send + Sync {
    /// Create a fresh instance for one dispatch
    fn create(&self) -> Result<Box<dyn Node>, NodeError>;

    /// Optional: log text for the unit. Derived from the registered name when `None`.
    fn metadata(&self) -> Option<NodeMetadata> {
        None
    }
}

#[derive(Clone)]
struct Registration {
    factory: Arc<dyn NodeFactory>,
    metadata: NodeMetadata,
}

/// Registry of available units, keyed by name
pub struct NodeRegistry {
    nodes: HashMap<String, Registration>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Register a unit factory under `name`. Names are never overwritten.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn NodeFactory>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if self.nodes.contains_key(&name) {
            return Err(EngineError::DuplicateRegistration(name));
        }

        let metadata = factory
            .metadata()
            .unwrap_or_else(|| NodeMetadata::named(name.clone()));
        tracing::info!("Registering node type: {}", name);
        self.nodes.insert(name, Registration { factory, metadata });
        Ok(())
    }

    /// Look up the factory registered under `name`
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn NodeFactory>, EngineError> {
        self.nodes
            .get(name)
            .map(|registration| Arc::clone(&registration.factory))
            .ok_or_else(|| EngineError::UnknownNode(name.to_string()))
    }

    pub(crate) fn resolve_with_metadata(
        &self,
        name: &str,
    ) -> Result<(Arc<dyn NodeFactory>, NodeMetadata), EngineError> {
        self.nodes
            .get(name)
            .map(|r| (Arc::clone(&r.factory), r.metadata.clone()))
            .ok_or_else(|| EngineError::UnknownNode(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Get all registered names, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get metadata for a registered unit
    pub fn get_metadata(&self, name: &str) -> Option<NodeMetadata> {
        self.nodes.get(name).map(|r| r.metadata.clone())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
