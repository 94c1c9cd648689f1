//! Standard node library
//!
//! Built-in units for tab lifecycle, page interaction and general use, plus
//! an in-memory browser that hosts them across background and content
//! engines.

mod debug;
mod element;
pub mod host;
mod http;
mod memory;
mod tab;
mod time;

pub use debug::{EchoNode, EchoNodeFactory};
pub use element::{ClickElementNode, ClickElementNodeFactory, WaitElementNode, WaitElementNodeFactory};
pub use host::{Element, ElementQuery, Page, TabHost, TabInfo, TabStatus, XPath};
pub use http::{HttpRequestNode, HttpRequestNodeFactory};
pub use memory::{MemoryBrowser, MemoryPage, DEFAULT_LOAD_DELAY};
pub use tab::{
    CloseTabNode, CloseTabNodeFactory, NewTabNode, NewTabNodeFactory, ReloadTabNode,
    ReloadTabNodeFactory,
};
pub use time::{SleepNode, SleepNodeFactory};

use relaycore::{EngineError, NEW_TAB};
use relayruntime::Engine;
use std::sync::Arc;

/// Host handles available to the process the nodes are registered in.
///
/// Units whose handle is missing are still registered, so the engine
/// knows where to forward them, but fail if they ever run here.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub tabs: Option<Arc<dyn TabHost>>,
    pub page: Option<Arc<dyn Page>>,
}

impl Capabilities {
    pub fn with_tabs(mut self, tabs: Arc<dyn TabHost>) -> Self {
        self.tabs = Some(tabs);
        self
    }

    pub fn with_page(mut self, page: Arc<dyn Page>) -> Self {
        self.page = Some(page);
        self
    }
}

/// Register all standard nodes with an engine
pub fn register_all(engine: &Engine, capabilities: &Capabilities) -> Result<(), EngineError> {
    let tabs = capabilities.tabs.clone();
    let page = capabilities.page.clone();

    engine.register_node(NEW_TAB, Arc::new(NewTabNodeFactory { tabs: tabs.clone() }))?;
    engine.register_node("CloseTab", Arc::new(CloseTabNodeFactory { tabs: tabs.clone() }))?;
    engine.register_node("ReloadTab", Arc::new(ReloadTabNodeFactory { tabs }))?;
    engine.register_node(
        "WaitElement",
        Arc::new(WaitElementNodeFactory { page: page.clone() }),
    )?;
    engine.register_node("ClickElement", Arc::new(ClickElementNodeFactory { page }))?;
    engine.register_node("Echo", Arc::new(EchoNodeFactory))?;
    engine.register_node("Sleep", Arc::new(SleepNodeFactory))?;
    engine.register_node("HttpRequest", Arc::new(HttpRequestNodeFactory::new()))?;
    Ok(())
}
