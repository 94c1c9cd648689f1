use crate::config::EngineConfig;
use crate::hook::Hook;
use crate::locality::{needs_own_tab, plan_route, Route};
use crate::registry::{NodeFactory, NodeRegistry};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use parking_lot::{RwLock, RwLockReadGuard};
use relaycore::{
    Affinity, Context, Destination, Dispatcher, EngineError, HookMessage, HookReply, Logger,
    Node, NodeContext, NodeError, NodeKind, NodeMetadata, NodeRaw, ProbeRequest, ProcessRole,
    SharedContext, TargetId, TargetMonitor, Task, Transport, NEW_TAB,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Dispatches units locally or to the process that must run them.
///
/// Cheap to clone; clones share the registry and the transport.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: RwLock<NodeRegistry>,
    transport: Option<Arc<dyn Transport>>,
    monitor: Option<Arc<dyn TargetMonitor>>,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    registry: NodeRegistry,
    transport: Option<Arc<dyn Transport>>,
    monitor: Option<Arc<dyn TargetMonitor>>,
}

impl EngineBuilder {
    pub fn registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn TargetMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                registry: RwLock::new(self.registry),
                transport: self.transport,
                monitor: self.monitor,
            }),
        }
    }
}

impl Engine {
    /// Create an engine with an empty registry and no peers
    pub fn new(config: EngineConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            registry: NodeRegistry::new(),
            transport: None,
            monitor: None,
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.inner.config.role
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register a unit under `name`
    pub fn register_node(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn NodeFactory>,
    ) -> Result<(), EngineError> {
        self.inner.registry.write().register(name, factory)
    }

    /// Read access to the registry for lookups and listings
    pub fn registry(&self) -> RwLockReadGuard<'_, NodeRegistry> {
        self.inner.registry.read()
    }

    /// Handler to install on the transport for messages addressed to this process
    pub fn create_hook(&self) -> Hook {
        Hook::new(self.clone())
    }

    fn lookup(&self, name: &str) -> Result<(Arc<dyn NodeFactory>, NodeMetadata), EngineError> {
        self.inner.registry.read().resolve_with_metadata(name)
    }

    /// Run one unit and record it as a child of `logger`.
    ///
    /// The returned record is settled (`success` or `error`) whatever the
    /// outcome; errors are logged and then returned, never swallowed.
    pub fn execute_node(
        &self,
        node_raw: NodeRaw,
        logger: Logger,
        context: SharedContext,
    ) -> BoxFuture<'_, Result<Value, EngineError>> {
        Box::pin(async move {
            let (factory, metadata) = self.lookup(&node_raw.name)?;
            let record = logger.open(&metadata)?;
            let started = Instant::now();

            let result = self
                .run_node(&node_raw, factory.as_ref(), &metadata, &record, &context)
                .await;

            match result {
                Ok(output) => {
                    record.succeed(&metadata);
                    tracing::debug!(
                        "Node {} completed in {}ms",
                        node_raw.name,
                        started.elapsed().as_millis()
                    );
                    Ok(output)
                }
                Err(e) => {
                    record.fail(&metadata, &e);
                    tracing::error!("Node {} failed: {}", node_raw.name, e);
                    Err(e)
                }
            }
        })
    }

    async fn run_node(
        &self,
        node_raw: &NodeRaw,
        factory: &dyn NodeFactory,
        metadata: &NodeMetadata,
        record: &Logger,
        context: &SharedContext,
    ) -> Result<Value, EngineError> {
        let node = factory
            .create()
            .map_err(|e| unit_error(&node_raw.name, metadata, e))?;
        let affinity = node.affinity();

        if self.needs_bootstrap(node_raw, node.as_ref()) {
            let has_target = context.read().await.has_target();
            if !has_target {
                self.bootstrap_tab(node_raw, context).await?;
            }
        }

        let active_tab = context.read().await.active_tab.id;
        let own_tab = if needs_own_tab(affinity, self.role()) {
            Some(self.current_tab(&node_raw.name).await?)
        } else {
            None
        };

        if self.role() == ProcessRole::Background && !active_tab.is_none() {
            self.wait_tab_ready(active_tab)
                .await
                .map_err(|e| unit_error(&node_raw.name, metadata, e))?;
        }

        match plan_route(affinity, self.role(), active_tab, own_tab) {
            Route::Forward(destination) => {
                self.forward(node_raw, destination, metadata, record, context)
                    .await
            }
            Route::Local => {
                if let Some(delay) = node_raw.delay() {
                    sleep(delay).await;
                }
                let ctx = NodeContext {
                    name: node_raw.name.clone(),
                    logger: record.clone(),
                    context: Arc::clone(context),
                    dispatcher: Arc::new(self.clone()),
                };
                node.execute(node_raw.data.clone(), ctx)
                    .await
                    .map_err(|e| unit_error(&node_raw.name, metadata, e))
            }
        }
    }

    fn needs_bootstrap(&self, node_raw: &NodeRaw, node: &dyn Node) -> bool {
        node.kind() == NodeKind::Job
            && node.affinity() == Affinity::Content
            && node_raw.name != NEW_TAB
            && self.role() != ProcessRole::Popup
    }

    /// Open the job's `initUrl` so it has a tab to run against.
    async fn bootstrap_tab(
        &self,
        node_raw: &NodeRaw,
        context: &SharedContext,
    ) -> Result<(), EngineError> {
        let url = node_raw
            .init_url()
            .ok_or_else(|| EngineError::MissingInitTarget {
                node: node_raw.name.clone(),
            })?;

        tracing::info!("No active tab for {}, opening {}", node_raw.name, url);
        let new_tab = NodeRaw::new(
            NEW_TAB,
            json!({
                "url": url,
                "active": true,
                "waitTabLoaded": true,
                "updatePrevTab": false,
                "tabLoadTimeout": self.inner.config.init_tab_timeout_ms,
            }),
        );

        // Detached logger: the bootstrap trace is not part of the caller's tree.
        self.execute_node(new_tab, Logger::root(), Arc::clone(context))
            .await
            .map(|_| ())
    }

    /// Ask background which tab this content process is injected into.
    async fn current_tab(&self, node: &str) -> Result<TargetId, EngineError> {
        let destination = Destination::Background;
        let transport = self.transport(node, destination)?;
        let reply = transport
            .send(destination, HookMessage::Probe(ProbeRequest::GetCurrentTabId))
            .await
            .map_err(|e| EngineError::RemoteDispatch {
                node: node.to_string(),
                destination,
                reason: e.to_string(),
            })?;

        match reply {
            HookReply::TabId(id) => Ok(id),
            HookReply::Failed(failure) => Err(EngineError::InvalidReply(failure.message)),
            HookReply::Node(_) => Err(EngineError::InvalidReply(
                "expected a tab id, got a node reply".to_string(),
            )),
        }
    }

    async fn wait_tab_ready(&self, tab: TargetId) -> Result<(), NodeError> {
        match &self.inner.monitor {
            Some(monitor) => {
                tracing::debug!("Waiting for tab {} to load", tab);
                monitor
                    .wait_until_ready(tab, self.inner.config.ready_options())
                    .await
            }
            None => Ok(()),
        }
    }

    fn transport(&self, node: &str, destination: Destination) -> Result<&Arc<dyn Transport>, EngineError> {
        self.inner
            .transport
            .as_ref()
            .ok_or_else(|| EngineError::RemoteDispatch {
                node: node.to_string(),
                destination,
                reason: format!("{} process has no transport", self.role()),
            })
    }

    /// Ship a unit to `destination` and fold the reply back in.
    async fn forward(
        &self,
        node_raw: &NodeRaw,
        destination: Destination,
        metadata: &NodeMetadata,
        record: &Logger,
        context: &SharedContext,
    ) -> Result<Value, EngineError> {
        let transport = self.transport(&node_raw.name, destination)?;
        let sent = context.read().await.clone();

        tracing::debug!("Forwarding {} to {}", node_raw.name, destination);
        let reply = transport
            .send(destination, HookMessage::node(node_raw.clone(), sent.clone()))
            .await
            .map_err(|e| EngineError::RemoteDispatch {
                node: node_raw.name.clone(),
                destination,
                reason: e.to_string(),
            })?;

        match reply {
            HookReply::Node(output) => {
                if let Some(remote) = output.log_data.children.into_iter().next() {
                    record.attach_json(remote)?;
                }
                context.write().await.merge_remote(&sent, output.context);
                Ok(output.output)
            }
            HookReply::Failed(mut failure) => {
                if let Some(remote) = failure
                    .log_data
                    .take()
                    .and_then(|log| log.children.into_iter().next())
                {
                    if let Err(e) = record.attach_json(remote) {
                        tracing::warn!("Dropping remote trace of {}: {}", node_raw.name, e);
                    }
                }
                if let Some(returned) = failure.context.take() {
                    context.write().await.merge_remote(&sent, returned);
                }
                Err(failure.into_error(&node_raw.name, destination, &metadata.message.error))
            }
            HookReply::TabId(_) => Err(EngineError::InvalidReply(format!(
                "{} answered {} with a tab id",
                destination, node_raw.name
            ))),
        }
    }

    /// Run units one after another on the same context.
    ///
    /// Waits `delay` before each step and stops at the first failure.
    pub async fn execute_nodes(
        &self,
        node_raws: Vec<NodeRaw>,
        logger: Logger,
        context: SharedContext,
        delay: Duration,
    ) -> Result<Vec<Value>, EngineError> {
        let mut results = Vec::with_capacity(node_raws.len());
        for node_raw in node_raws {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let output = self
                .execute_node(node_raw, logger.clone(), Arc::clone(&context))
                .await?;
            results.push(output);
        }
        Ok(results)
    }

    /// Run units concurrently on the same context.
    ///
    /// Every unit is driven to completion; results come back in input
    /// order, and the first failure in input order is returned.
    pub async fn execute_concurrent_nodes(
        &self,
        node_raws: Vec<NodeRaw>,
        logger: Logger,
        context: SharedContext,
    ) -> Result<Vec<Value>, EngineError> {
        let dispatches = node_raws
            .into_iter()
            .map(|node_raw| self.execute_node(node_raw, logger.clone(), Arc::clone(&context)));

        join_all(dispatches).await.into_iter().collect()
    }

    /// Run a task under one outer record and return the root logger.
    ///
    /// Never fails: the outcome is the status of the task record.
    pub async fn execute_task(
        &self,
        task: Task,
        logger: Option<Logger>,
        context: Option<SharedContext>,
    ) -> Logger {
        let logger = logger.unwrap_or_else(Logger::root);
        let context = context.unwrap_or_else(|| Context::new().shared());

        {
            let mut ctx = context.write().await;
            if ctx.root_log_id.is_empty() {
                ctx.root_log_id = logger.root_logger().id();
            }
        }

        let task_logger = match logger.open(&task.metadata) {
            Ok(task_logger) => task_logger,
            Err(e) => {
                tracing::error!("Cannot record task {}: {}", task.metadata.name, e);
                return logger;
            }
        };

        let delay = if task.data.delay > 0 {
            Duration::from_millis(task.data.delay)
        } else {
            self.inner.config.step_delay()
        };

        tracing::info!(
            "Starting task: {} ({} steps)",
            task.metadata.name,
            task.data.nodes.len()
        );
        let result = self
            .execute_nodes(task.data.nodes, task_logger.clone(), context, delay)
            .await;

        match result {
            Ok(results) => {
                task_logger.succeed(&task.metadata);
                tracing::info!("Task {} completed: {} steps", task.metadata.name, results.len());
            }
            Err(e) => {
                task_logger.fail(&task.metadata, &e);
                tracing::error!("Task {} failed: {}", task.metadata.name, e);
            }
        }

        logger
    }

    /// Like [`Engine::execute_task`], from an undecoded task descriptor.
    pub async fn execute_task_raw(
        &self,
        task_raw: Value,
        logger: Option<Logger>,
        context: Option<SharedContext>,
    ) -> Logger {
        let name = task_raw
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Task")
            .to_string();

        match serde_json::from_value::<Task>(task_raw) {
            Ok(task) => self.execute_task(task, logger, context).await,
            Err(e) => {
                let logger = logger.unwrap_or_else(Logger::root);
                let metadata = NodeMetadata::named(name);
                let error = EngineError::Serialization(e);
                tracing::error!("Invalid task {}: {}", metadata.name, error);
                if let Ok(task_logger) = logger.open(&metadata) {
                    task_logger.fail(&metadata, &error);
                }
                logger
            }
        }
    }
}

#[async_trait]
impl Dispatcher for Engine {
    async fn dispatch(
        &self,
        node_raw: NodeRaw,
        logger: Logger,
        context: SharedContext,
    ) -> Result<Value, EngineError> {
        self.execute_node(node_raw, logger, context).await
    }

    async fn dispatch_sequence(
        &self,
        node_raws: Vec<NodeRaw>,
        logger: Logger,
        context: SharedContext,
        delay: Duration,
    ) -> Result<Vec<Value>, EngineError> {
        self.execute_nodes(node_raws, logger, context, delay).await
    }

    async fn dispatch_concurrent(
        &self,
        node_raws: Vec<NodeRaw>,
        logger: Logger,
        context: SharedContext,
    ) -> Result<Vec<Value>, EngineError> {
        self.execute_concurrent_nodes(node_raws, logger, context).await
    }
}

/// Attach the unit's declared error message to a failure of its own.
fn unit_error(node: &str, metadata: &NodeMetadata, error: NodeError) -> EngineError {
    match error {
        NodeError::Timeout(timeout) => EngineError::Timeout(timeout),
        source => EngineError::UnitExecution {
            node: node.to_string(),
            message: metadata.message.error.clone(),
            source,
        },
    }
}
