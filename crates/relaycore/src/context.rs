use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Identifier of an addressable target (a tab).
///
/// `TargetId::NONE` is the reserved sentinel for "no target", carried as
/// `-1` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(i64);

impl TargetId {
    pub const NONE: TargetId = TargetId(-1);

    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveTab {
    pub id: TargetId,
    pub url: String,
}

/// Shared execution state threaded through every dispatch of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub root_log_id: String,
    pub window_id: i64,
    pub active_tab: ActiveTab,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// The one Context instance of a task, shared by reference.
pub type SharedContext = Arc<RwLock<Context>>;

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with caller-supplied extension fields merged in.
    pub fn with_extensions<I, K>(extensions: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut context = Self::new();
        for (key, value) in extensions {
            context.extensions.insert(key.into(), value);
        }
        context
    }

    pub fn shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }

    pub fn has_target(&self) -> bool {
        !self.active_tab.id.is_none()
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    pub fn set_extension(&mut self, key: impl Into<String>, value: Value) {
        self.extensions.insert(key.into(), value);
    }

    /// Fold the context returned by a remote process back into this one.
    ///
    /// `sent` is the snapshot that travelled with the request. Only
    /// top-level fields the remote side changed relative to that snapshot
    /// are written, so concurrent round trips touching disjoint fields do
    /// not clobber each other. When two of them change the same field, the
    /// one that completes last wins.
    pub fn merge_remote(&mut self, sent: &Context, returned: Context) -> bool {
        let mut changed = false;

        if returned.root_log_id != sent.root_log_id {
            self.root_log_id = returned.root_log_id;
            changed = true;
        }
        if returned.window_id != sent.window_id {
            self.window_id = returned.window_id;
            changed = true;
        }
        if returned.active_tab != sent.active_tab {
            self.active_tab = returned.active_tab;
            changed = true;
        }

        for key in sent.extensions.keys() {
            if !returned.extensions.contains_key(key) {
                self.extensions.remove(key);
                changed = true;
            }
        }
        for (key, value) in returned.extensions {
            if sent.extensions.get(&key) != Some(&value) {
                self.extensions.insert(key, value);
                changed = true;
            }
        }

        changed
    }
}
