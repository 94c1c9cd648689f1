//! In-memory browser: tabs, pages and content-process injection.
//!
//! Every tab it creates gets its own content engine listening on the
//! switchboard, the way a browser injects a content script into each page.
//! Loading is simulated with a fixed delay, after which the tab shows the
//! elements registered for its URL.

use crate::host::{wait_tab_loaded, Element, ElementQuery, Page, TabHost, TabInfo, TabStatus};
use crate::{register_all, Capabilities};
use async_trait::async_trait;
use parking_lot::Mutex;
use relaycore::{
    Destination, EngineError, MessageSender, NodeError, ProcessRole, ReadyOptions, TargetId,
    TargetMonitor,
};
use relayruntime::{Engine, EngineConfig, Switchboard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_LOAD_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
struct Site {
    elements: Vec<Element>,
    error: Option<String>,
}

#[derive(Debug)]
struct TabState {
    url: String,
    status: TabStatus,
    active: bool,
    error: Option<String>,
    elements: Vec<Element>,
    clicks: Vec<Element>,
    /// Bumped on every navigation so stale loads are ignored.
    generation: u64,
}

impl TabState {
    fn navigate(&mut self, url: &str) {
        self.url = url.to_string();
        self.status = TabStatus::Loading;
        self.error = None;
        self.elements.clear();
        self.generation += 1;
    }
}

#[derive(Debug, Default)]
struct BrowserState {
    next_id: i64,
    tabs: BTreeMap<i64, TabState>,
    sites: HashMap<String, Site>,
}

impl BrowserState {
    fn tab(&self, tab: TargetId) -> Result<&TabState, NodeError> {
        self.tabs.get(&tab.get()).ok_or_else(|| no_tab(tab))
    }

    fn tab_mut(&mut self, tab: TargetId) -> Result<&mut TabState, NodeError> {
        self.tabs.get_mut(&tab.get()).ok_or_else(|| no_tab(tab))
    }

    fn activate(&mut self, tab: TargetId) {
        for (id, state) in self.tabs.iter_mut() {
            state.active = *id == tab.get();
        }
    }

    fn finish_load(&mut self, tab: TargetId, generation: u64) {
        let site = {
            let Some(state) = self.tabs.get(&tab.get()) else {
                return;
            };
            if state.generation != generation {
                return;
            }
            self.sites.get(&state.url).cloned().unwrap_or_default()
        };

        if let Some(state) = self.tabs.get_mut(&tab.get()) {
            state.status = TabStatus::Complete;
            state.elements = site.elements;
            state.error = site.error;
            tracing::debug!("Tab {} loaded {}", tab, state.url);
        }
    }

    fn info(&self, tab: TargetId) -> Result<TabInfo, NodeError> {
        let state = self.tab(tab)?;
        Ok(TabInfo {
            id: tab,
            url: state.url.clone(),
            status: state.status,
            active: state.active,
            error: state.error.clone(),
        })
    }
}

fn no_tab(tab: TargetId) -> NodeError {
    NodeError::ExecutionFailed(format!("no-tab: {}", tab))
}

/// Tab host for a background engine, with one content engine per tab.
pub struct MemoryBrowser {
    state: Arc<Mutex<BrowserState>>,
    switchboard: Arc<Switchboard>,
    config: EngineConfig,
    load_delay: Duration,
}

impl MemoryBrowser {
    pub fn new(switchboard: Arc<Switchboard>, config: EngineConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrowserState {
                next_id: 1,
                ..BrowserState::default()
            })),
            switchboard,
            config,
            load_delay: DEFAULT_LOAD_DELAY,
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Serve `elements` for pages loaded from `url`.
    pub fn with_site(self, url: impl Into<String>, elements: Vec<Element>) -> Self {
        self.state.lock().sites.insert(
            url.into(),
            Site {
                elements,
                error: None,
            },
        );
        self
    }

    /// Make every load of `url` end with a navigation error.
    pub fn with_broken_site(self, url: impl Into<String>, error: impl Into<String>) -> Self {
        self.state.lock().sites.insert(
            url.into(),
            Site {
                elements: Vec::new(),
                error: Some(error.into()),
            },
        );
        self
    }

    /// Build the background engine and put it on the switchboard.
    pub fn background_engine(self: &Arc<Self>) -> Result<Engine, EngineError> {
        let engine = Engine::builder(self.config_for(ProcessRole::Background))
            .transport(Arc::new(self.switchboard.endpoint(MessageSender::default())))
            .monitor(Arc::clone(self) as Arc<dyn TargetMonitor>)
            .build();

        register_all(
            &engine,
            &Capabilities::default().with_tabs(Arc::clone(self) as Arc<dyn TabHost>),
        )?;
        self.switchboard
            .listen(Destination::Background, engine.create_hook());
        Ok(engine)
    }

    pub fn tabs(&self) -> Vec<TabInfo> {
        let state = self.state.lock();
        state
            .tabs
            .keys()
            .filter_map(|&id| state.info(TargetId::new(id)).ok())
            .collect()
    }

    /// Elements clicked in `tab`, oldest first.
    pub fn clicks(&self, tab: TargetId) -> Vec<Element> {
        self.state
            .lock()
            .tab(tab)
            .map(|state| state.clicks.clone())
            .unwrap_or_default()
    }

    fn config_for(&self, role: ProcessRole) -> EngineConfig {
        EngineConfig {
            role,
            ..self.config.clone()
        }
    }

    /// Start the content engine serving `tab`.
    fn inject(&self, tab: TargetId) -> Result<(), NodeError> {
        let page: Arc<dyn Page> = Arc::new(MemoryPage {
            tab,
            state: Arc::clone(&self.state),
        });
        let engine = Engine::builder(self.config_for(ProcessRole::Content))
            .transport(Arc::new(
                self.switchboard.endpoint(MessageSender { tab: Some(tab) }),
            ))
            .build();

        register_all(&engine, &Capabilities::default().with_page(page))
            .map_err(|e| NodeError::Configuration(e.to_string()))?;
        self.switchboard
            .listen(Destination::Target(tab), engine.create_hook());
        tracing::debug!("Injected content engine into tab {}", tab);
        Ok(())
    }

    fn schedule_load(&self, tab: TargetId, generation: u64) {
        let state = Arc::clone(&self.state);
        let delay = self.load_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            state.lock().finish_load(tab, generation);
        });
    }
}

#[async_trait]
impl TabHost for MemoryBrowser {
    async fn create(&self, url: &str, active: bool) -> Result<TabInfo, NodeError> {
        let tab = {
            let mut state = self.state.lock();
            let tab = TargetId::new(state.next_id);
            state.next_id += 1;
            state.tabs.insert(
                tab.get(),
                TabState {
                    url: url.to_string(),
                    status: TabStatus::Loading,
                    active,
                    error: None,
                    elements: Vec::new(),
                    clicks: Vec::new(),
                    generation: 0,
                },
            );
            if active {
                state.activate(tab);
            }
            tab
        };

        self.inject(tab)?;
        self.schedule_load(tab, 0);
        self.state.lock().info(tab)
    }

    async fn update(&self, tab: TargetId, url: &str, active: bool) -> Result<TabInfo, NodeError> {
        let (generation, info) = {
            let mut state = self.state.lock();
            let tab_state = state.tab_mut(tab)?;
            tab_state.navigate(url);
            let generation = tab_state.generation;
            if active {
                state.activate(tab);
            }
            (generation, state.info(tab)?)
        };

        self.schedule_load(tab, generation);
        Ok(info)
    }

    /// Closes all of `tabs` or, if any of them is unknown, none.
    async fn remove(&self, tabs: &[TargetId]) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if let Some(&missing) = tabs.iter().find(|tab| !state.tabs.contains_key(&tab.get())) {
            return Err(no_tab(missing));
        }
        for &tab in tabs {
            if state.tabs.remove(&tab.get()).is_some() {
                self.switchboard.unlisten(Destination::Target(tab));
            }
        }
        Ok(())
    }

    async fn reload(&self, tab: TargetId) -> Result<(), NodeError> {
        let generation = {
            let mut state = self.state.lock();
            let tab_state = state.tab_mut(tab)?;
            let url = tab_state.url.clone();
            tab_state.navigate(&url);
            tab_state.generation
        };

        self.schedule_load(tab, generation);
        Ok(())
    }

    async fn get(&self, tab: TargetId) -> Result<TabInfo, NodeError> {
        self.state.lock().info(tab)
    }
}

#[async_trait]
impl TargetMonitor for MemoryBrowser {
    async fn wait_until_ready(
        &self,
        target: TargetId,
        options: ReadyOptions,
    ) -> Result<(), NodeError> {
        wait_tab_loaded(self, target, options).await
    }
}

/// The page of one tab, as seen from its content engine.
pub struct MemoryPage {
    tab: TargetId,
    state: Arc<Mutex<BrowserState>>,
}

#[async_trait]
impl Page for MemoryPage {
    async fn query(&self, query: &ElementQuery) -> Result<Vec<Element>, NodeError> {
        let state = self.state.lock();
        let tab = state.tab(self.tab)?;
        if tab.status == TabStatus::Loading {
            return Ok(Vec::new());
        }
        Ok(tab
            .elements
            .iter()
            .filter(|element| query.matches(element))
            .cloned()
            .collect())
    }

    async fn click(&self, element: &Element) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        let tab = state.tab_mut(self.tab)?;
        if !tab.elements.contains(element) {
            return Err(NodeError::ExecutionFailed(format!(
                "element <{}> is no longer on the page",
                element.tag
            )));
        }
        tab.clicks.push(element.clone());
        Ok(())
    }
}
