// crates/relaynodes/tests/browser_test.rs

use relaycore::{
    Context, EngineError, LogRecord, LogStatus, Logger, MessageSender, NodeRaw, ProcessRole, Task,
    TargetId,
};
use relaynodes::{register_all, Capabilities, Element, MemoryBrowser};
use relayruntime::{Engine, EngineConfig, Switchboard};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SITE: &str = "https://shop.test";

fn browser() -> (Arc<MemoryBrowser>, Engine) {
    let (browser, engine, _) = browser_on_board();
    (browser, engine)
}

fn browser_on_board() -> (Arc<MemoryBrowser>, Engine, Arc<Switchboard>) {
    let board = Switchboard::new();
    let browser = MemoryBrowser::new(Arc::clone(&board), EngineConfig::default())
        .with_load_delay(Duration::from_millis(20))
        .with_site(
            SITE,
            vec![
                Element::new("h1").with_text("Welcome to the shop"),
                Element::new("button").with_id("buy").with_class("primary").with_text("Buy now"),
                Element::new("a").with_class("nav").with_text("Sign in"),
            ],
        );
    let browser = Arc::new(browser);
    let engine = browser.background_engine().unwrap();
    (browser, engine, board)
}

/// A popup engine: everything it is asked to run goes to background.
fn popup(board: &Arc<Switchboard>) -> Engine {
    let popup = Engine::builder(EngineConfig::for_role(ProcessRole::Popup))
        .transport(Arc::new(board.endpoint(MessageSender::default())))
        .build();
    register_all(&popup, &Capabilities::default()).unwrap();
    popup
}

fn task_record(root: &Logger) -> LogRecord {
    root.children()[0].to_json()
}

fn names(record: &LogRecord) -> Vec<String> {
    record
        .walk()
        .into_iter()
        .filter_map(|r| r.data.as_ref().map(|data| data.name.clone()))
        .collect()
}

#[tokio::test]
async fn test_click_bootstraps_tab_and_clicks_across_processes() {
    let (browser, engine) = browser();
    let context = Context::new().shared();
    let task = Task::new("Buy").step(
        "ClickElement",
        json!({ "initUrl": SITE, "type": "css-selector", "input": "#buy", "timeout": 2000 }),
    );

    let root = engine.execute_task(task, None, Some(Arc::clone(&context))).await;

    let record = task_record(&root);
    assert_eq!(record.status(), Some(LogStatus::Success), "{:#?}", record);

    let tab = context.read().await.active_tab.clone();
    assert_eq!(tab.id, TargetId::new(1));
    assert_eq!(tab.url, SITE);

    let clicks = browser.clicks(tab.id);
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].id.as_deref(), Some("buy"));

    // Background record, then the content record it carried back, then the
    // nested wait. The bootstrap NewTab stays out of the task's tree.
    assert_eq!(
        names(&record),
        vec!["Buy", "ClickElement", "ClickElement", "WaitElement"]
    );
    assert!(record.walk().iter().all(|r| r.status() == Some(LogStatus::Success)));
}

#[tokio::test]
async fn test_open_search_and_close() {
    let (browser, engine) = browser();
    let context = Context::new().shared();
    let task = Task::new("Browse")
        .step("NewTab", json!({ "url": SITE, "waitTabLoaded": true }))
        .step("WaitElement", json!({ "type": "search", "input": { "body": "Sign" } }))
        .step("CloseTab", json!({}));

    let root = engine.execute_task(task, None, Some(Arc::clone(&context))).await;

    let record = task_record(&root);
    assert_eq!(record.status(), Some(LogStatus::Success), "{:#?}", record);
    assert!(context.read().await.active_tab.id.is_none());
    assert!(browser.tabs().is_empty());
}

#[tokio::test]
async fn test_new_tab_url_validation() {
    let (_browser, engine) = browser();

    for (url, reason) in [("", "url-empty"), ("ftp://files.test", "invalid-url")] {
        let root = engine
            .execute_task(Task::new("Open").step("NewTab", json!({ "url": url })), None, None)
            .await;

        let record = task_record(&root);
        assert_eq!(record.status(), Some(LogStatus::Error));
        let step = &record.children[0];
        let error = step.data.as_ref().and_then(|data| data.error.clone()).unwrap();
        assert!(error.message.contains(reason), "{}", error.message);
    }
}

#[tokio::test]
async fn test_missing_element_times_out_with_last_error() {
    let (_browser, engine) = browser();
    let task = Task::new("Wait").step(
        "WaitElement",
        json!({ "initUrl": SITE, "type": "css-selector", "input": "#gone", "timeout": 300 }),
    );

    let root = engine.execute_task(task, None, None).await;

    let record = task_record(&root);
    assert_eq!(record.status(), Some(LogStatus::Error));
    let error = record.children[0]
        .data
        .as_ref()
        .and_then(|data| data.error.clone())
        .unwrap();
    assert!(error.message.contains("Timeout 300ms"), "{}", error.message);
    assert!(error.message.contains("#gone"), "{}", error.message);
}

#[tokio::test]
async fn test_universal_nodes_run_in_background() {
    let (browser, engine) = browser();
    let task = Task::new("Local")
        .step("Echo", json!({ "value": "hi" }))
        .step("Sleep", json!({ "ms": 10 }));

    let root = engine.execute_task(task, None, None).await;

    assert_eq!(task_record(&root).status(), Some(LogStatus::Success));
    assert!(browser.tabs().is_empty());
}

#[tokio::test]
async fn test_popup_click_is_bootstrapped_by_background() {
    let (browser, _engine, board) = browser_on_board();
    let popup = popup(&board);
    let context = Context::new().shared();
    let task = Task::new("Buy from popup").step(
        "ClickElement",
        json!({ "initUrl": SITE, "type": "css-selector", "input": "#buy", "timeout": 2000 }),
    );

    let root = popup.execute_task(task, None, Some(Arc::clone(&context))).await;

    let record = task_record(&root);
    assert_eq!(record.status(), Some(LogStatus::Success), "{:#?}", record);
    let tab = context.read().await.active_tab.id;
    assert_eq!(tab, TargetId::new(1));
    assert_eq!(browser.clicks(tab).len(), 1);
    assert_eq!(browser.tabs().len(), 1);
    // popup record, background record, content record, nested wait
    assert_eq!(
        names(&record),
        vec![
            "Buy from popup",
            "ClickElement",
            "ClickElement",
            "ClickElement",
            "WaitElement"
        ]
    );
}

#[tokio::test]
async fn test_popup_job_without_target_or_init_url() {
    let (browser, _engine, board) = browser_on_board();
    let popup = popup(&board);

    let err = popup
        .execute_node(
            NodeRaw::new("WaitElement", json!({ "type": "css-selector", "input": "#buy" })),
            Logger::root(),
            Context::new().shared(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::MissingInitTarget { node } if node == "WaitElement"));
    assert!(browser.tabs().is_empty());
}
