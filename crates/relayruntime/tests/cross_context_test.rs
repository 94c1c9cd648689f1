// crates/relayruntime/tests/cross_context_test.rs

use async_trait::async_trait;
use relaycore::{
    ActiveTab, Affinity, Context, Destination, EngineError, LogStatus, Logger, MessageSender,
    Node, NodeContext, NodeError, NodeKind, NodeRaw, ProcessRole, SharedContext, TargetId,
    TimeoutError, NEW_TAB,
};
use relayruntime::{Engine, EngineConfig, NodeFactory, Switchboard};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Records which process ran it in the `ranIn` extension.
struct Stamp {
    affinity: Affinity,
}

#[async_trait]
impl Node for Stamp {
    fn affinity(&self) -> Affinity {
        self.affinity
    }

    async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
        let label = input["label"].as_str().unwrap_or_default().to_string();
        ctx.context
            .write()
            .await
            .set_extension("ranIn", json!(label.clone()));
        Ok(json!(label))
    }
}

struct StampFactory(Affinity);

impl NodeFactory for StampFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(Stamp { affinity: self.0 }))
    }
}

struct Explode;

#[async_trait]
impl Node for Explode {
    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    async fn execute(&self, _input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
        ctx.context.write().await.set_extension("touched", json!(true));
        Err(NodeError::ExecutionFailed("tab host refused".to_string()))
    }
}

struct ExplodeFactory;

impl NodeFactory for ExplodeFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(Explode))
    }
}

/// Fails the way a retry loop that ran out of time does.
struct Slow;

#[async_trait]
impl Node for Slow {
    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    async fn execute(&self, _input: Value, _ctx: NodeContext) -> Result<Value, NodeError> {
        Err(NodeError::Timeout(TimeoutError {
            timeout_ms: 5,
            last_error: "x".to_string(),
        }))
    }
}

struct SlowFactory;

impl NodeFactory for SlowFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(Slow))
    }
}

/// Content job answering with the name of the engine that ran it.
struct WhoAmI {
    name: &'static str,
}

#[async_trait]
impl Node for WhoAmI {
    fn affinity(&self) -> Affinity {
        Affinity::Content
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Job
    }

    async fn execute(&self, _input: Value, _ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(json!(self.name))
    }
}

struct WhoAmIFactory(&'static str);

impl NodeFactory for WhoAmIFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(WhoAmI { name: self.0 }))
    }
}

/// Stand-in for the tab opener: points the context at tab 5.
struct OpenTab {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for OpenTab {
    fn affinity(&self) -> Affinity {
        Affinity::Background
    }

    async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = input["url"].as_str().unwrap_or_default().to_string();
        ctx.context.write().await.active_tab = ActiveTab { id: tab(), url };
        Ok(json!({ "tabId": tab() }))
    }
}

struct OpenTabFactory(Arc<AtomicUsize>);

impl NodeFactory for OpenTabFactory {
    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(OpenTab {
            calls: Arc::clone(&self.0),
        }))
    }
}

struct Peers {
    board: Arc<Switchboard>,
    background: Engine,
    content: Engine,
    opened: Arc<AtomicUsize>,
}

impl Peers {
    /// A popup engine talking to this background.
    fn popup(&self) -> Engine {
        let popup = Engine::builder(EngineConfig::for_role(ProcessRole::Popup))
            .transport(Arc::new(self.board.endpoint(MessageSender::default())))
            .build();
        register_common(&popup, "popup");
        popup
    }

    /// Inject another content engine into `tab`.
    fn inject(&self, tab: TargetId, name: &'static str) -> Engine {
        let content = Engine::builder(EngineConfig::for_role(ProcessRole::Content))
            .transport(Arc::new(self.board.endpoint(MessageSender { tab: Some(tab) })))
            .build();
        register_common(&content, name);
        self.board.listen(Destination::Target(tab), content.create_hook());
        content
    }
}

fn register_common(engine: &Engine, name: &'static str) {
    engine
        .register_node("BackgroundStamp", Arc::new(StampFactory(Affinity::Background)))
        .unwrap();
    engine
        .register_node("ContentStamp", Arc::new(StampFactory(Affinity::Content)))
        .unwrap();
    engine.register_node("Explode", Arc::new(ExplodeFactory)).unwrap();
    engine.register_node("Slow", Arc::new(SlowFactory)).unwrap();
    engine.register_node("WhoAmI", Arc::new(WhoAmIFactory(name))).unwrap();
}

const TAB: TargetId = TargetId::NONE;

fn tab() -> TargetId {
    TargetId::new(5)
}

/// A background engine and one content engine injected into tab 5.
fn peers() -> Peers {
    let board = Switchboard::new();
    let opened = Arc::new(AtomicUsize::new(0));

    let background = Engine::builder(EngineConfig::for_role(ProcessRole::Background))
        .transport(Arc::new(board.endpoint(MessageSender::default())))
        .build();
    register_common(&background, "background");
    background
        .register_node(NEW_TAB, Arc::new(OpenTabFactory(Arc::clone(&opened))))
        .unwrap();
    board.listen(Destination::Background, background.create_hook());

    let content = Engine::builder(EngineConfig::for_role(ProcessRole::Content))
        .transport(Arc::new(board.endpoint(MessageSender { tab: Some(tab()) })))
        .build();
    register_common(&content, "content 5");
    board.listen(Destination::Target(tab()), content.create_hook());

    Peers {
        board,
        background,
        content,
        opened,
    }
}

fn context_on(tab: TargetId) -> SharedContext {
    let mut context = Context::new();
    context.active_tab = ActiveTab {
        id: tab,
        url: "https://a.test".to_string(),
    };
    context.shared()
}

#[tokio::test]
async fn test_content_forwards_background_unit() {
    let peers = peers();
    let root = Logger::root();
    let context = context_on(tab());

    let output = peers
        .content
        .execute_node(
            NodeRaw::new("BackgroundStamp", json!({ "label": "bg" })),
            root.clone(),
            Arc::clone(&context),
        )
        .await
        .unwrap();

    assert_eq!(output, json!("bg"));
    assert_eq!(context.read().await.extension("ranIn"), Some(&json!("bg")));

    // Local record with the remote record attached verbatim underneath.
    let local = &root.children()[0];
    assert_eq!(local.status(), Some(LogStatus::Success));
    let remote = local.children();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].data().unwrap().name, "BackgroundStamp");
    assert_eq!(remote[0].status(), Some(LogStatus::Success));
}

#[tokio::test]
async fn test_background_forwards_content_unit_to_active_tab() {
    let peers = peers();
    let root = Logger::root();
    let context = context_on(tab());

    // The content engine probes background for its own tab before running.
    let output = peers
        .background
        .execute_node(
            NodeRaw::new("ContentStamp", json!({ "label": "page" })),
            root.clone(),
            Arc::clone(&context),
        )
        .await
        .unwrap();

    assert_eq!(output, json!("page"));
    assert_eq!(context.read().await.extension("ranIn"), Some(&json!("page")));
    assert_eq!(root.children()[0].children().len(), 1);
}

#[tokio::test]
async fn test_unreachable_tab_names_expected_process() {
    let peers = peers();
    let context = context_on(TargetId::new(8));

    let err = peers
        .background
        .execute_node(
            NodeRaw::new("ContentStamp", json!({ "label": "lost" })),
            Logger::root(),
            context,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::RemoteDispatch { destination: Destination::Target(id), .. } if id.get() == 8
    ));
    assert!(err
        .to_string()
        .ends_with("Does the content (tab 8) process register node \"ContentStamp\"?"));
}

#[tokio::test]
async fn test_remote_failure_keeps_remote_trace_and_context() {
    let peers = peers();
    let root = Logger::root();
    let context = context_on(tab());

    let err = peers
        .content
        .execute_node(NodeRaw::new("Explode", json!({})), root.clone(), Arc::clone(&context))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("tab host refused"));
    assert_eq!(context.read().await.extension("touched"), Some(&json!(true)));

    let local = &root.children()[0];
    assert_eq!(local.status(), Some(LogStatus::Error));
    let remote = local.children();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].status(), Some(LogStatus::Error));
}

#[tokio::test]
async fn test_concurrent_round_trips_merge_disjoint_fields() {
    let peers = peers();
    let context = context_on(tab());
    context.write().await.set_extension("keep", json!(1));

    let results = peers
        .content
        .execute_concurrent_nodes(
            vec![
                NodeRaw::new("BackgroundStamp", json!({ "label": "one" })),
                NodeRaw::new("ContentStamp", json!({ "label": "two" })),
            ],
            Logger::root(),
            Arc::clone(&context),
        )
        .await
        .unwrap();

    assert_eq!(results, vec![json!("one"), json!("two")]);
    let context = context.read().await;
    assert_eq!(context.extension("keep"), Some(&json!(1)));
    assert!(context.extension("ranIn").is_some());
    assert_ne!(context.active_tab.id, TAB);
}

#[tokio::test]
async fn test_unit_missing_on_peer_is_a_dispatch_failure() {
    let peers = peers();
    peers
        .content
        .register_node("Ghost", Arc::new(StampFactory(Affinity::Background)))
        .unwrap();

    let err = peers
        .content
        .execute_node(NodeRaw::new("Ghost", json!({})), Logger::root(), context_on(tab()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::RemoteDispatch { destination: Destination::Background, ref node, .. }
            if node == "Ghost"
    ));
    assert!(err
        .to_string()
        .ends_with("Does the background process register node \"Ghost\"?"));
}

#[tokio::test]
async fn test_remote_timeout_is_not_wrapped() {
    let peers = peers();

    let err = peers
        .content
        .execute_node(NodeRaw::new("Slow", json!({})), Logger::root(), context_on(tab()))
        .await
        .unwrap_err();

    match err {
        EngineError::Timeout(timeout) => {
            assert_eq!(timeout.timeout_ms, 5);
            assert_eq!(timeout.last_error, "x");
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_popup_job_without_init_url() {
    let peers = peers();
    let popup = peers.popup();

    let err = popup
        .execute_node(NodeRaw::new("WhoAmI", json!({})), Logger::root(), Context::new().shared())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::MissingInitTarget { node } if node == "WhoAmI"));
    assert_eq!(peers.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_popup_forwards_and_background_bootstraps() {
    let peers = peers();
    let popup = peers.popup();
    let root = Logger::root();
    let context = Context::new().shared();

    let output = popup
        .execute_node(
            NodeRaw::new("WhoAmI", json!({ "initUrl": "https://a.test" })),
            root.clone(),
            Arc::clone(&context),
        )
        .await
        .unwrap();

    assert_eq!(output, json!("content 5"));
    assert_eq!(peers.opened.load(Ordering::SeqCst), 1);
    let context = context.read().await;
    assert_eq!(context.active_tab.id, tab());
    assert_eq!(context.active_tab.url, "https://a.test");

    // popup -> background -> content, one record per hop.
    let popup_record = &root.children()[0];
    let background_record = &popup_record.children()[0];
    let content_record = &background_record.children()[0];
    assert_eq!(popup_record.status(), Some(LogStatus::Success));
    assert_eq!(background_record.data().unwrap().name, "WhoAmI");
    assert_eq!(content_record.data().unwrap().name, "WhoAmI");
    assert!(content_record.children().is_empty());
}

#[tokio::test]
async fn test_popup_runs_nothing_locally() {
    let peers = peers();
    let popup = peers.popup();
    let context = context_on(tab());

    let output = popup
        .execute_node(
            NodeRaw::new("BackgroundStamp", json!({ "label": "via popup" })),
            Logger::root(),
            Arc::clone(&context),
        )
        .await
        .unwrap();

    assert_eq!(output, json!("via popup"));
    assert_eq!(context.read().await.extension("ranIn"), Some(&json!("via popup")));
}

#[tokio::test]
async fn test_content_relays_unit_for_another_tab() {
    let peers = peers();
    let other = TargetId::new(7);
    peers.inject(other, "content 7");
    let root = Logger::root();

    let output = peers
        .content
        .execute_node(NodeRaw::new("WhoAmI", json!({})), root.clone(), context_on(other))
        .await
        .unwrap();

    assert_eq!(output, json!("content 7"));
    // content 5 -> background -> content 7
    let hop = &root.children()[0].children()[0];
    assert_eq!(hop.children().len(), 1);
    assert_eq!(hop.children()[0].status(), Some(LogStatus::Success));
}
