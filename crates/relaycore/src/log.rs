//! Hierarchical execution log.
//!
//! Records live in an arena owned by the tree; a [`Logger`] is a cheap
//! handle (tree + slot index + generation) to one record. Parent and root
//! links are slot indices, so they never appear in the exported form and
//! never own anything. Freed slots are reused; the generation keeps a
//! handle to a removed record from reaching its successor.

use crate::error::{error_chain, LogError};
use crate::node::NodeMetadata;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type LogId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Success,
    Error,
}

impl LogStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LogStatus::Pending)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStatus::Pending => write!(f, "pending"),
            LogStatus::Success => write!(f, "success"),
            LogStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogErrorDetail {
    pub message: String,
    pub stack: String,
}

/// Payload of one log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    pub name: String,
    pub description: String,
    pub message: String,
    pub status: LogStatus,
    /// Elapsed milliseconds, filled in when the record settles.
    pub duration: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LogErrorDetail>,
}

impl LogData {
    /// A fresh `pending` payload stamped with the current time.
    pub fn pending(metadata: &NodeMetadata) -> Self {
        Self {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            message: metadata.message.pending.clone(),
            status: LogStatus::Pending,
            duration: 0,
            timestamp: now(),
            error: None,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.timestamp).num_milliseconds().max(0) as u64
    }
}

/// Partial payload for [`Logger::update`]; `None` fields are left as is.
#[derive(Debug, Clone, Default)]
pub struct LogPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub message: Option<String>,
    pub status: Option<LogStatus>,
    pub duration: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub error: Option<LogErrorDetail>,
}

impl LogPatch {
    pub fn status(status: LogStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn apply(self, data: &mut LogData) {
        if let Some(name) = self.name {
            data.name = name;
        }
        if let Some(description) = self.description {
            data.description = description;
        }
        if let Some(message) = self.message {
            data.message = message;
        }
        if let Some(status) = self.status {
            data.status = status;
        }
        if let Some(duration) = self.duration {
            data.duration = duration;
        }
        if let Some(timestamp) = self.timestamp {
            data.timestamp = timestamp;
        }
        if let Some(error) = self.error {
            data.error = Some(error);
        }
    }
}

/// Exported form of a record and its subtree: `{ id, ...payload, children }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: LogId,
    #[serde(flatten)]
    pub data: Option<LogData>,
    #[serde(default)]
    pub children: Vec<LogRecord>,
}

impl LogRecord {
    pub fn status(&self) -> Option<LogStatus> {
        self.data.as_ref().map(|data| data.status)
    }

    /// Depth-first iterator over this record and every descendant.
    pub fn walk(&self) -> Vec<&LogRecord> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    fn collect_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        ids.push(&self.id);
        for child in &self.children {
            child.collect_ids(ids);
        }
    }
}

struct Slot {
    id: LogId,
    data: Option<LogData>,
    parent: Option<usize>,
    children: Vec<usize>,
}

struct LogTree {
    slots: Vec<Option<Slot>>,
    /// Bumped every time the slot at the same index is freed.
    generations: Vec<u64>,
    free: Vec<usize>,
    root: usize,
}

impl LogTree {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            root: 0,
        }
    }

    fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    fn is_live(&self, index: usize, generation: u64) -> bool {
        self.generations.get(index) == Some(&generation) && self.slot(index).is_some()
    }

    fn live(&self, index: usize, generation: u64) -> Option<&Slot> {
        if self.is_live(index, generation) {
            self.slot(index)
        } else {
            None
        }
    }

    fn live_mut(&mut self, index: usize, generation: u64) -> Option<&mut Slot> {
        if self.is_live(index, generation) {
            self.slot_mut(index)
        } else {
            None
        }
    }

    fn push(&mut self, id: LogId, data: Option<LogData>, parent: Option<usize>) -> usize {
        let slot = Some(Slot {
            id,
            data,
            parent,
            children: Vec::new(),
        });
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.generations.push(0);
                self.slots.len() - 1
            }
        };
        if let Some(parent) = parent.and_then(|p| self.slot_mut(p)) {
            parent.children.push(index);
        }
        index
    }

    fn find_from(&self, start: usize, id: &str) -> Option<usize> {
        let slot = self.slot(start)?;
        if slot.id == id {
            return Some(start);
        }
        slot.children
            .iter()
            .find_map(|&child| self.find_from(child, id))
    }

    fn subtree(&self, start: usize, out: &mut Vec<usize>) {
        if let Some(slot) = self.slot(start) {
            out.push(start);
            for &child in &slot.children {
                self.subtree(child, out);
            }
        }
    }

    fn free_subtree(&mut self, start: usize) {
        let mut indices = Vec::new();
        self.subtree(start, &mut indices);
        for index in indices {
            self.slots[index] = None;
            self.generations[index] += 1;
            self.free.push(index);
        }
    }

    fn detach(&mut self, index: usize) {
        let parent = self.slot(index).and_then(|slot| slot.parent);
        if let Some(parent) = parent.and_then(|p| self.slot_mut(p)) {
            parent.children.retain(|&child| child != index);
        }
        self.free_subtree(index);
    }

    fn clear_children(&mut self, index: usize) {
        let children = match self.slot_mut(index) {
            Some(slot) => std::mem::take(&mut slot.children),
            None => return,
        };
        for child in children {
            self.free_subtree(child);
        }
    }

    /// Ids of every live record except those under `exclude`.
    fn ids_outside(&self, exclude: Option<usize>) -> HashSet<String> {
        let mut excluded = Vec::new();
        if let Some(exclude) = exclude {
            self.subtree(exclude, &mut excluded);
        }
        let skipped: HashSet<usize> = excluded.into_iter().collect();
        self.slots
            .iter()
            .enumerate()
            .filter(|(index, _)| !skipped.contains(index))
            .filter_map(|(_, slot)| slot.as_ref().map(|slot| slot.id.clone()))
            .collect()
    }

    fn check_importable(&self, record: &LogRecord, replacing: Option<usize>) -> Result<(), LogError> {
        let existing = self.ids_outside(replacing);
        let mut ids = Vec::new();
        record.collect_ids(&mut ids);

        let mut seen = HashSet::new();
        for id in ids {
            if existing.contains(id) || !seen.insert(id) {
                return Err(LogError::DuplicateId(id.to_string()));
            }
        }
        Ok(())
    }

    fn build(&mut self, record: LogRecord, parent: usize) -> usize {
        let index = self.push(record.id, record.data, Some(parent));
        for child in record.children {
            self.build(child, index);
        }
        index
    }

    fn export(&self, index: usize) -> Option<LogRecord> {
        let slot = self.slot(index)?;
        Some(LogRecord {
            id: slot.id.clone(),
            data: slot.data.clone(),
            children: slot
                .children
                .iter()
                .filter_map(|&child| self.export(child))
                .collect(),
        })
    }
}

/// Handle to one record of a log tree.
#[derive(Clone)]
pub struct Logger {
    tree: Arc<Mutex<LogTree>>,
    index: usize,
    generation: u64,
}

impl Logger {
    /// Create a new tree and return its root record.
    pub fn root() -> Self {
        let mut tree = LogTree::new();
        tree.push(new_id(), None, None);
        Self {
            tree: Arc::new(Mutex::new(tree)),
            index: 0,
            generation: 0,
        }
    }

    /// Rebuild a standalone tree from an exported record.
    pub fn from_json(record: LogRecord) -> Result<Self, LogError> {
        let logger = Self::root();
        logger.import_json(record)?;
        Ok(logger)
    }

    fn handle(&self, tree: &LogTree, index: usize) -> Logger {
        Logger {
            tree: Arc::clone(&self.tree),
            index,
            generation: tree.generations.get(index).copied().unwrap_or_default(),
        }
    }

    /// Id of this record; empty once the record has been removed.
    pub fn id(&self) -> LogId {
        self.tree
            .lock()
            .live(self.index, self.generation)
            .map(|slot| slot.id.clone())
            .unwrap_or_default()
    }

    pub fn data(&self) -> Option<LogData> {
        self.tree
            .lock()
            .live(self.index, self.generation)
            .and_then(|slot| slot.data.clone())
    }

    pub fn status(&self) -> Option<LogStatus> {
        self.data().map(|data| data.status)
    }

    pub fn is_attached(&self) -> bool {
        self.tree.lock().live(self.index, self.generation).is_some()
    }

    pub fn is_root(&self) -> bool {
        let tree = self.tree.lock();
        tree.root == self.index && tree.is_live(self.index, self.generation)
    }

    pub fn root_logger(&self) -> Logger {
        let tree = self.tree.lock();
        self.handle(&tree, tree.root)
    }

    pub fn parent(&self) -> Option<Logger> {
        let tree = self.tree.lock();
        let parent = tree.live(self.index, self.generation)?.parent?;
        Some(self.handle(&tree, parent))
    }

    pub fn children(&self) -> Vec<Logger> {
        let tree = self.tree.lock();
        match tree.live(self.index, self.generation) {
            Some(slot) => slot.children.iter().map(|&c| self.handle(&tree, c)).collect(),
            None => Vec::new(),
        }
    }

    /// Add a record. With `parent_id` the parent is searched from the
    /// tree root; otherwise the record becomes a child of `self`.
    pub fn add(&self, data: LogData, parent_id: Option<&str>) -> Result<Logger, LogError> {
        let mut tree = self.tree.lock();
        let parent = match parent_id {
            Some(parent_id) => {
                let root = tree.root;
                tree.find_from(root, parent_id)
                    .ok_or_else(|| LogError::ParentNotFound(parent_id.to_string()))?
            }
            None => {
                if tree.live(self.index, self.generation).is_none() {
                    return Err(LogError::Detached);
                }
                self.index
            }
        };
        let index = tree.push(new_id(), Some(data), Some(parent));
        Ok(self.handle(&tree, index))
    }

    /// Depth-first search from this record.
    pub fn find(&self, id: &str) -> Option<Logger> {
        let tree = self.tree.lock();
        tree.live(self.index, self.generation)?;
        let index = tree.find_from(self.index, id)?;
        Some(self.handle(&tree, index))
    }

    /// Remove a record and its subtree. Direct children are checked first,
    /// then the whole tree. The root itself cannot be removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut tree = self.tree.lock();
        let direct = tree.live(self.index, self.generation).and_then(|slot| {
            slot.children
                .iter()
                .copied()
                .find(|&child| tree.slot(child).is_some_and(|c| c.id == id))
        });
        let target = match direct {
            Some(index) => Some(index),
            None => {
                let root = tree.root;
                tree.find_from(root, id).filter(|&index| index != root)
            }
        };
        match target {
            Some(index) => {
                tree.detach(index);
                true
            }
            None => false,
        }
    }

    /// Shallow-merge `patch` into the record with `id`, searched from the root.
    pub fn update(&self, id: &str, patch: LogPatch) -> bool {
        let mut tree = self.tree.lock();
        let root = tree.root;
        let Some(index) = tree.find_from(root, id) else {
            return false;
        };
        match tree.slot_mut(index).and_then(|slot| slot.data.as_mut()) {
            Some(data) => {
                patch.apply(data);
                true
            }
            None => false,
        }
    }

    /// Shallow-merge `patch` into this record.
    pub fn patch(&self, patch: LogPatch) {
        if let Some(data) = self
            .tree
            .lock()
            .live_mut(self.index, self.generation)
            .and_then(|slot| slot.data.as_mut())
        {
            patch.apply(data);
        }
    }

    pub fn clear(&self) {
        let mut tree = self.tree.lock();
        if tree.is_live(self.index, self.generation) {
            tree.clear_children(self.index);
        }
    }

    pub fn to_json(&self) -> LogRecord {
        let tree = self.tree.lock();
        let live = tree.is_live(self.index, self.generation);
        live.then(|| tree.export(self.index)).flatten().unwrap_or_else(|| LogRecord {
            id: LogId::new(),
            data: None,
            children: Vec::new(),
        })
    }

    /// Replace this record (id, payload and children) with `record`.
    pub fn import_json(&self, record: LogRecord) -> Result<(), LogError> {
        let mut tree = self.tree.lock();
        if tree.live(self.index, self.generation).is_none() {
            return Err(LogError::Detached);
        }
        tree.check_importable(&record, Some(self.index))?;

        tree.clear_children(self.index);
        if let Some(slot) = tree.live_mut(self.index, self.generation) {
            slot.id = record.id;
            slot.data = record.data;
        }
        for child in record.children {
            tree.build(child, self.index);
        }
        Ok(())
    }

    /// Attach `record` verbatim as a new child of this record.
    pub fn attach_json(&self, record: LogRecord) -> Result<Logger, LogError> {
        let mut tree = self.tree.lock();
        if tree.live(self.index, self.generation).is_none() {
            return Err(LogError::Detached);
        }
        tree.check_importable(&record, None)?;
        let index = tree.build(record, self.index);
        Ok(self.handle(&tree, index))
    }

    /// Open a `pending` child record for a unit.
    pub fn open(&self, metadata: &NodeMetadata) -> Result<Logger, LogError> {
        self.add(LogData::pending(metadata), None)
    }

    /// Settle this record as `success`.
    pub fn succeed(&self, metadata: &NodeMetadata) {
        if let Some(data) = self
            .tree
            .lock()
            .live_mut(self.index, self.generation)
            .and_then(|slot| slot.data.as_mut())
        {
            data.status = LogStatus::Success;
            data.message = metadata.message.success.clone();
            data.duration = data.elapsed_ms();
        }
    }

    /// Settle this record as `error`, keeping the error text and its causes.
    pub fn fail(&self, metadata: &NodeMetadata, error: &(dyn std::error::Error + 'static)) {
        if let Some(data) = self
            .tree
            .lock()
            .live_mut(self.index, self.generation)
            .and_then(|slot| slot.data.as_mut())
        {
            data.status = LogStatus::Error;
            data.message = if metadata.message.error.is_empty() {
                error.to_string()
            } else {
                metadata.message.error.clone()
            };
            data.error = Some(LogErrorDetail {
                message: error.to_string(),
                stack: error_chain(error),
            });
            data.duration = data.elapsed_ms();
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

fn new_id() -> LogId {
    Uuid::new_v4().to_string()
}

/// Current time truncated to what survives the millisecond wire format.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
