//! Linear undo/redo history over circuit snapshots.
//!
//! ```text
//!   entries:  [ s0 ][ s1 ][ s2 ][ s3 ]
//!                         ▲
//!                      current
//!
//!   push(s4)  ──►  [ s0 ][ s1 ][ s2 ][ s4 ]      (s3 pruned)
//! ```
//!
//! [`HistoryLog`] is the shared cursor/truncation/eviction machinery and is
//! generic over the entry type, so the collaborative log can reuse it with
//! author-tagged entries. [`HistoryStack`] is the single-user stack with
//! bookmarks on top of it.
//!
//! Every operation is total: stepping past either end, or jumping out of
//! range, returns `None` and leaves the log untouched.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::graph::{CircuitState, Connection, Neuron};

pub const INITIAL_LABEL: &str = "Initial state";

/// Number of entries shown by [`HistoryStack::summary`].
pub const RECENT_WINDOW: usize = 5;

/// Anything that can sit in a [`HistoryLog`].
pub trait HistoryRecord {
    fn id(&self) -> Uuid;
    fn state(&self) -> &CircuitState;

    /// `(user_id, user_name)` for entries in a shared log.
    fn author(&self) -> Option<(&str, &str)> {
        None
    }

    fn bookmark_name(&self) -> Option<&str> {
        None
    }
}

/// What happened to a `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Recorded { index: usize },
    /// The push only echoed a state that was just restored.
    Suppressed,
    /// A conflict is waiting for the user; the log is frozen until then.
    Blocked,
    /// There was nothing new to record.
    Unchanged,
}

impl PushOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, PushOutcome::Recorded { .. })
    }
}

// ───────────────────────────────────────────────────────────────────
// HistoryLog
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HistoryLog<E> {
    entries: Vec<E>,
    current: usize,
    max_history: usize,
    /// Graph most recently put on the canvas by navigation or a remote
    /// apply. The next push is dropped if it carries exactly this graph.
    restored: Option<CircuitState>,
}

impl<E: HistoryRecord> HistoryLog<E> {
    pub fn new(max_history: usize) -> Self {
        Self {
            entries: Vec::new(),
            current: 0,
            max_history: max_history.max(1),
            restored: None,
        }
    }

    /// Replace the whole log with a single entry.
    pub fn reset(&mut self, entry: E) {
        self.entries.clear();
        self.entries.push(entry);
        self.current = 0;
        self.restored = None;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = 0;
        self.restored = None;
    }

    /// Append after the cursor, pruning any redo branch and evicting the
    /// oldest entries past `max_history`. Returns the new cursor.
    pub fn append(&mut self, entry: E) -> usize {
        if !self.entries.is_empty() {
            self.entries.truncate(self.current + 1);
        }
        self.entries.push(entry);

        let overflow = self.entries.len().saturating_sub(self.max_history);
        if overflow > 0 {
            self.entries.drain(..overflow);
            log::trace!("history: evicted {overflow} oldest entries");
        }

        self.current = self.entries.len() - 1;
        self.current
    }

    /// Drop the last entry, pulling the cursor back if it pointed there.
    pub fn discard_tail(&mut self) -> Option<E> {
        let entry = self.entries.pop()?;
        if self.current >= self.entries.len() {
            self.current = self.entries.len().saturating_sub(1);
        }
        Some(entry)
    }

    pub fn undo(&mut self) -> Option<&E> {
        if !self.can_undo() {
            return None;
        }
        self.current -= 1;
        self.arm_current();
        self.entries.get(self.current)
    }

    pub fn redo(&mut self) -> Option<&E> {
        if !self.can_redo() {
            return None;
        }
        self.current += 1;
        self.arm_current();
        self.entries.get(self.current)
    }

    pub fn jump_to(&mut self, index: usize) -> Option<&E> {
        if index >= self.entries.len() {
            return None;
        }
        self.current = index;
        self.arm_current();
        self.entries.get(self.current)
    }

    /// Mark `state` as just applied to the canvas.
    pub fn arm_guard(&mut self, state: CircuitState) {
        self.restored = Some(state);
    }

    pub fn disarm_guard(&mut self) {
        self.restored = None;
    }

    /// Consume the restore guard. Returns `true` when the push carrying
    /// this graph is the canvas echoing a restored state.
    pub fn take_guard(&mut self, neurons: &[Neuron], connections: &[Connection]) -> bool {
        match self.restored.take() {
            Some(state) => state.same_graph(neurons, connections),
            None => false,
        }
    }

    fn arm_current(&mut self) {
        self.restored = self.entries.get(self.current).map(|e| e.state().clone());
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        !self.entries.is_empty() && self.current < self.entries.len() - 1
    }

    pub fn current(&self) -> Option<&E> {
        self.entries.get(self.current)
    }

    pub fn current_index(&self) -> Option<usize> {
        (!self.entries.is_empty()).then_some(self.current)
    }

    pub fn tail(&self) -> Option<&E> {
        self.entries.last()
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn position_of(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }

    pub(crate) fn entry_mut(&mut self, id: Uuid) -> Option<&mut E> {
        self.entries.iter_mut().find(|e| e.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }
}

// ───────────────────────────────────────────────────────────────────
// Local stack
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    #[serde(flatten)]
    pub state: CircuitState,
    pub is_bookmarked: bool,
    pub bookmark_name: Option<String>,
}

impl HistoryEntry {
    pub fn new(state: CircuitState) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            is_bookmarked: false,
            bookmark_name: None,
        }
    }
}

impl HistoryRecord for HistoryEntry {
    fn id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> &CircuitState {
        &self.state
    }

    fn bookmark_name(&self) -> Option<&str> {
        if self.is_bookmarked {
            self.bookmark_name.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bookmark {
    pub index: usize,
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryItem {
    pub index: usize,
    pub label: String,
    pub timestamp: u64,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    pub total_entries: usize,
    pub current_index: Option<usize>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub bookmark_count: usize,
    /// Newest last.
    pub recent: Vec<SummaryItem>,
}

/// Single-user undo/redo stack with bookmarks.
#[derive(Debug, Clone)]
pub struct HistoryStack {
    log: HistoryLog<HistoryEntry>,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(&HistoryConfig::default())
    }
}

impl HistoryStack {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            log: HistoryLog::new(config.max_history),
        }
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            log: HistoryLog::new(max_history),
        }
    }

    pub fn init(&mut self, neurons: &[Neuron], connections: &[Connection]) {
        self.log
            .reset(HistoryEntry::new(CircuitState::capture(neurons, connections, INITIAL_LABEL)));
    }

    /// Record an edit. Suppressed once after undo/redo/jump when the canvas
    /// pushes back the state it was just given.
    pub fn push(&mut self, neurons: &[Neuron], connections: &[Connection], label: impl Into<String>) -> PushOutcome {
        if self.log.take_guard(neurons, connections) {
            log::trace!("history: suppressed echo of restored state");
            return PushOutcome::Suppressed;
        }
        let index = self
            .log
            .append(HistoryEntry::new(CircuitState::capture(neurons, connections, label)));
        PushOutcome::Recorded { index }
    }

    /// Record a persisted version as a new edit.
    pub fn restore(&mut self, state: &CircuitState) -> PushOutcome {
        self.log.disarm_guard();
        self.push(
            &state.neurons,
            &state.connections,
            format!("Restored: {}", state.label),
        )
    }

    pub fn undo(&mut self) -> Option<&CircuitState> {
        self.log.undo().map(|e| &e.state)
    }

    pub fn redo(&mut self) -> Option<&CircuitState> {
        self.log.redo().map(|e| &e.state)
    }

    pub fn jump_to_state(&mut self, index: usize) -> Option<&CircuitState> {
        self.log.jump_to(index).map(|e| &e.state)
    }

    /// Flip the bookmark on entry `id`. Returns the new bookmarked flag,
    /// or `None` if no such entry exists.
    pub fn toggle_bookmark(&mut self, id: Uuid, name: Option<String>) -> Option<bool> {
        let entry = self.log.entry_mut(id)?;
        entry.is_bookmarked = !entry.is_bookmarked;
        entry.bookmark_name = if entry.is_bookmarked {
            Some(name.unwrap_or_else(|| entry.state.label.clone()))
        } else {
            None
        };
        Some(entry.is_bookmarked)
    }

    /// Rename an existing bookmark. Returns `false` if `id` is not bookmarked.
    pub fn rename_bookmark(&mut self, id: Uuid, name: impl Into<String>) -> bool {
        match self.log.entry_mut(id) {
            Some(entry) if entry.is_bookmarked => {
                entry.bookmark_name = Some(name.into());
                true
            }
            _ => false,
        }
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.log
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_bookmarked)
            .map(|(index, e)| Bookmark {
                index,
                id: e.id,
                name: e.bookmark_name.clone().unwrap_or_else(|| e.state.label.clone()),
                label: e.state.label.clone(),
                timestamp: e.state.timestamp,
            })
            .collect()
    }

    pub fn summary(&self) -> HistorySummary {
        let entries = self.log.entries();
        let current = self.log.current_index();
        let start = entries.len().saturating_sub(RECENT_WINDOW);
        HistorySummary {
            total_entries: entries.len(),
            current_index: current,
            can_undo: self.log.can_undo(),
            can_redo: self.log.can_redo(),
            bookmark_count: entries.iter().filter(|e| e.is_bookmarked).count(),
            recent: entries[start..]
                .iter()
                .enumerate()
                .map(|(offset, e)| SummaryItem {
                    index: start + offset,
                    label: e.state.label.clone(),
                    timestamp: e.state.timestamp,
                    is_current: current == Some(start + offset),
                })
                .collect(),
        }
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }

    pub fn current(&self) -> Option<&CircuitState> {
        self.log.current().map(|e| &e.state)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.log.current_index()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        self.log.entries()
    }

    pub fn log(&self) -> &HistoryLog<HistoryEntry> {
        &self.log
    }

    pub fn can_undo(&self) -> bool {
        self.log.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.log.can_redo()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
