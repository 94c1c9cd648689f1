//! Host handles the tab and page units act on.
//!
//! A background process owns a [`TabHost`]; a content process owns the
//! [`Page`] of the tab it is injected into.

use async_trait::async_trait;
use relaycore::{retry_until_timeout, NodeError, ReadyOptions, TargetId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Poll interval while waiting for a tab to load.
pub const TAB_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Navigation errors that never fail a load.
const IGNORED_LOAD_ERRORS: [&str; 2] = ["net::ERR_BLOCKED_BY_CLIENT", "net::ERR_ABORTED"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TargetId,
    pub url: String,
    pub status: TabStatus,
    pub active: bool,
    /// Navigation error of the last load, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tab lifecycle operations available to the background process.
#[async_trait]
pub trait TabHost: Send + Sync {
    async fn create(&self, url: &str, active: bool) -> Result<TabInfo, NodeError>;

    /// Navigate an existing tab.
    async fn update(&self, tab: TargetId, url: &str, active: bool) -> Result<TabInfo, NodeError>;

    async fn remove(&self, tabs: &[TargetId]) -> Result<(), NodeError>;

    async fn reload(&self, tab: TargetId) -> Result<(), NodeError>;

    async fn get(&self, tab: TargetId) -> Result<TabInfo, NodeError>;
}

/// Wait until `tab` has finished loading.
///
/// With `fail_on_error` a navigation error ends the wait early; otherwise
/// only the timeout does.
pub async fn wait_tab_loaded(
    tabs: &dyn TabHost,
    tab: TargetId,
    options: ReadyOptions,
) -> Result<(), NodeError> {
    let outcome = retry_until_timeout(
        move || async move {
            let info = match tabs.get(tab).await {
                Ok(info) => info,
                Err(e) => return Ok(Err(e)),
            };
            if options.fail_on_error {
                if let Some(error) = info
                    .error
                    .filter(|error| !IGNORED_LOAD_ERRORS.contains(&error.as_str()))
                {
                    return Ok(Err(NodeError::ExecutionFailed(error)));
                }
            }
            match info.status {
                TabStatus::Complete => Ok(Ok(())),
                TabStatus::Loading => Err(format!("tab {} is still loading", tab)),
            }
        },
        options.timeout,
        TAB_POLL_INTERVAL,
    )
    .await?;

    outcome
}

/// A simplified page element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default)]
    pub text: String,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            classes: Vec::new(),
            text: String::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Match a single simple selector: `#id`, `.class`, `tag`, `tag#id`
    /// or `tag.class`.
    pub fn matches_selector(&self, selector: &str) -> bool {
        let selector = selector.trim();
        if selector.is_empty() {
            return false;
        }

        let (tag, rest) = match selector.find(['#', '.']) {
            Some(at) => selector.split_at(at),
            None => (selector, ""),
        };
        if !tag.is_empty() && !tag.eq_ignore_ascii_case(&self.tag) {
            return false;
        }

        if let Some(id) = rest.strip_prefix('#') {
            self.id.as_deref() == Some(id)
        } else if let Some(class) = rest.strip_prefix('.') {
            self.classes.iter().any(|c| c == class)
        } else {
            true
        }
    }
}

/// How an element is looked up on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementQuery {
    CssSelector(String),
    XPath(XPath),
    /// Elements whose text contains the string.
    Search(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum XPathTest {
    Id(String),
    Class(String),
    TextEquals(String),
    TextContains(String),
}

/// A descendant step with at most one predicate: `//tag`, `//*`,
/// `//tag[@id="x"]`, `//tag[@class="x"]`, `//tag[text()="x"]` or
/// `//tag[contains(text(), "x")]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    source: String,
    tag: Option<String>,
    test: Option<XPathTest>,
}

impl XPath {
    pub fn parse(source: &str) -> Result<Self, NodeError> {
        let unsupported =
            || NodeError::Configuration(format!("Unsupported xpath expression: {}", source));

        let step = source.trim().strip_prefix("//").ok_or_else(unsupported)?;
        let (tag, predicate) = match step.find('[') {
            Some(at) => {
                let predicate = step[at + 1..].strip_suffix(']').ok_or_else(unsupported)?;
                (&step[..at], Some(predicate.trim()))
            }
            None => (step, None),
        };
        if tag.is_empty() || !(tag == "*" || tag.chars().all(|c| c.is_ascii_alphanumeric())) {
            return Err(unsupported());
        }

        let test = match predicate {
            None => None,
            Some(predicate) => Some(parse_predicate(predicate).ok_or_else(unsupported)?),
        };

        Ok(Self {
            source: source.to_string(),
            tag: (tag != "*").then(|| tag.to_string()),
            test,
        })
    }

    pub fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if !tag.eq_ignore_ascii_case(&element.tag) {
                return false;
            }
        }
        match &self.test {
            None => true,
            Some(XPathTest::Id(id)) => element.id.as_deref() == Some(id.as_str()),
            Some(XPathTest::Class(class)) => element.classes.join(" ") == *class,
            Some(XPathTest::TextEquals(text)) => element.text == *text,
            Some(XPathTest::TextContains(text)) => element.text.contains(text.as_str()),
        }
    }
}

fn parse_predicate(predicate: &str) -> Option<XPathTest> {
    if let Some(args) = predicate
        .strip_prefix("contains(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let (subject, literal) = args.split_once(',')?;
        return match subject.trim() {
            "text()" | "." => Some(XPathTest::TextContains(unquote(literal)?)),
            _ => None,
        };
    }

    let (subject, literal) = predicate.split_once('=')?;
    let literal = unquote(literal)?;
    match subject.trim() {
        "@id" => Some(XPathTest::Id(literal)),
        "@class" => Some(XPathTest::Class(literal)),
        "text()" | "." => Some(XPathTest::TextEquals(literal)),
        _ => None,
    }
}

fn unquote(literal: &str) -> Option<String> {
    let literal = literal.trim();
    ['"', '\'']
        .iter()
        .find_map(|quote| literal.strip_prefix(*quote)?.strip_suffix(*quote))
        .map(str::to_string)
}

impl ElementQuery {
    /// Parse `{type, input}` where `type` is `css-selector`, `xpath` or
    /// `search`. A search input is a string or `{body}`.
    pub fn from_input(input: &Value) -> Result<Self, NodeError> {
        let kind = relaycore::require_str(input, "type")?;
        let query = relaycore::require_input(input, "input")?;

        match kind {
            "css-selector" => query
                .as_str()
                .map(|selector| ElementQuery::CssSelector(selector.to_string()))
                .ok_or_else(|| invalid("input", "string")),
            "xpath" => query
                .as_str()
                .ok_or_else(|| invalid("input", "string"))
                .and_then(XPath::parse)
                .map(ElementQuery::XPath),
            "search" => query
                .as_str()
                .or_else(|| query.get("body").and_then(Value::as_str))
                .map(|text| ElementQuery::Search(text.to_string()))
                .ok_or_else(|| invalid("input", "string or {body}")),
            other => Err(NodeError::Configuration(format!(
                "Unsupported element query type: {}",
                other
            ))),
        }
    }

    pub fn matches(&self, element: &Element) -> bool {
        match self {
            ElementQuery::CssSelector(selector) => element.matches_selector(selector),
            ElementQuery::XPath(xpath) => xpath.matches(element),
            ElementQuery::Search(text) => element.text.contains(text.as_str()),
        }
    }
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementQuery::CssSelector(selector) => write!(f, "css-selector \"{}\"", selector),
            ElementQuery::XPath(xpath) => write!(f, "with xpath \"{}\"", xpath.source),
            ElementQuery::Search(text) => write!(f, "containing \"{}\"", text),
        }
    }
}

fn invalid(field: &str, expected: &str) -> NodeError {
    NodeError::InvalidInputType {
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

/// Page of the tab a content process is injected into.
#[async_trait]
pub trait Page: Send + Sync {
    /// Elements currently matching `query`; empty while the page loads.
    async fn query(&self, query: &ElementQuery) -> Result<Vec<Element>, NodeError>;

    async fn click(&self, element: &Element) -> Result<(), NodeError>;
}
