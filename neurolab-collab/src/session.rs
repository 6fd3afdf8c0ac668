//! Collaborative history for one client in one room.
//!
//! ```text
//!  local edit ──► push_state ──► log.append ──► publish(history_action)
//!  undo/redo  ──► log cursor  ──────────────► publish(history_navigate)
//!
//!  remote history_action ──► detect_conflict?
//!                              ├─ no  ──► log.append ──► Applied { graph, notification }
//!                              └─ yes ──► PendingConflict ──► resolve_conflict(keep_local)
//!  remote history_navigate ──────────────────► Navigated { graph }   (log untouched)
//! ```
//!
//! Each client is the only writer of its own log. Peers converge because
//! every message carries a complete graph, not because of any global
//! order: a missed message is never replayed, the next one received simply
//! supersedes it. Values that came off the wire are handed back wrapped in
//! [`Reconciled`] so callers can tell them from local results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use neurolab_core::history::INITIAL_LABEL;
use neurolab_core::{
    CircuitState, Connection, HistoryLog, HistoryRecord, MergeOptions, MergeResult, Neuron,
    PushOutcome, TimelineGroup, TimelineRow, group_by_bucket, merge_circuits, project,
};

use crate::channel::{HistoryTransport, channel_name};
use crate::config::SessionConfig;
use crate::protocol::{GraphPayload, HistoryEvent, NavigateDirection, NavigatePayload};

pub const IMPORT_LABEL: &str = "Imported circuit";

// ───────────────────────────────────────────────────────────────────
// Entries and identity
// ───────────────────────────────────────────────────────────────────

/// A history entry tagged with the user who authored it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborativeHistoryEntry {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub action: String,
    /// Flattened, so the entry carries `neurons`, `connections`,
    /// `timestamp` and `label` at its top level.
    #[serde(flatten)]
    pub state: CircuitState,
}

impl CollaborativeHistoryEntry {
    pub fn new(identity: &Identity, state: CircuitState) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: identity.user_id.clone(),
            user_name: identity.user_name.clone(),
            action: state.label.clone(),
            state,
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.state.timestamp
    }
}

impl HistoryRecord for CollaborativeHistoryEntry {
    fn id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> &CircuitState {
        &self.state
    }

    fn author(&self) -> Option<(&str, &str)> {
        Some((self.user_id.as_str(), self.user_name.as_str()))
    }
}

/// Current user as supplied by the identity provider. Both fields are
/// opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Outcomes
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Subscribing,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote { user_id: String, user_name: String },
}

/// A value plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T> Reconciled<T> {
    pub fn local(value: T) -> Self {
        Self { value, origin: Origin::Local }
    }

    pub fn remote(value: T, user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            value,
            origin: Origin::Remote {
                user_id: user_id.into(),
                user_name: user_name.into(),
            },
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.origin, Origin::Remote { .. })
    }
}

/// Toast shown when a peer's edit lands on the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: String,
    pub user_name: String,
    pub action: String,
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.user_name, self.action)
    }
}

/// Two near-simultaneous edits waiting for a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConflict {
    pub local: CollaborativeHistoryEntry,
    pub remote: CollaborativeHistoryEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Our own message relayed back.
    OwnEcho,
    NotLive,
    ConflictPending,
}

/// What the canvas should do after a remote event.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Appended to the log; render the graph and show the notification.
    Applied {
        update: Reconciled<CircuitState>,
        notification: Notification,
    },
    /// A peer navigated; render the graph, the log is unchanged.
    Navigated(Reconciled<CircuitState>),
    Conflict(PendingConflict),
    Ignored(IgnoreReason),
}

impl RemoteOutcome {
    /// Graph to put on the canvas, if any.
    pub fn graph(&self) -> Option<&CircuitState> {
        match self {
            RemoteOutcome::Applied { update, .. } => Some(&update.value),
            RemoteOutcome::Navigated(update) => Some(&update.value),
            RemoteOutcome::Conflict(_) | RemoteOutcome::Ignored(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    KeptLocal,
    AcceptedRemote(Reconciled<CircuitState>),
}

// ───────────────────────────────────────────────────────────────────
// Activity hooks
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    EditRecorded { label: String },
    CircuitImported { neurons_added: usize, conflicts: usize },
    VersionRestored { label: String },
    ConflictResolved { kept_local: bool },
}

/// Receives side effects for bookkeeping outside the editor (progress
/// tracking, achievements). Must not block.
pub trait ActivitySink {
    fn record(&self, activity: &Activity);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActivity;

impl ActivitySink for NoopActivity {
    fn record(&self, _activity: &Activity) {}
}

// ───────────────────────────────────────────────────────────────────
// Conflict detection
// ───────────────────────────────────────────────────────────────────

/// True when `incoming` collides with the tail of our log: the tail was
/// authored here, the incoming entry was not, and their timestamps are at
/// most `window_ms` apart.
pub fn detect_conflict(
    local_tail: Option<&CollaborativeHistoryEntry>,
    local_user_id: &str,
    incoming: &CollaborativeHistoryEntry,
    window_ms: u64,
) -> bool {
    match local_tail {
        Some(tail) => {
            tail.user_id == local_user_id
                && incoming.user_id != local_user_id
                && tail.timestamp().abs_diff(incoming.timestamp()) <= window_ms
        }
        None => false,
    }
}

// ───────────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────────

pub struct CollaborativeHistory<T: HistoryTransport> {
    identity: Identity,
    room_id: String,
    channel: String,
    phase: SessionPhase,
    log: HistoryLog<CollaborativeHistoryEntry>,
    /// The snapshot taken by `init`; it is not an edit and never conflicts.
    initial_id: Option<Uuid>,
    conflict_window_ms: u64,
    pending: Option<PendingConflict>,
    transport: T,
    activity: Box<dyn ActivitySink + Send>,
}

impl<T: HistoryTransport> CollaborativeHistory<T> {
    pub fn new(identity: Identity, room_id: impl Into<String>, config: &SessionConfig, transport: T) -> Self {
        let room_id = room_id.into();
        Self {
            identity,
            channel: channel_name(&room_id),
            room_id,
            phase: SessionPhase::Disconnected,
            log: HistoryLog::new(config.max_history),
            initial_id: None,
            conflict_window_ms: config.conflict_window_ms,
            pending: None,
            transport,
            activity: Box::new(NoopActivity),
        }
    }

    pub fn with_activity_sink(mut self, sink: impl ActivitySink + Send + 'static) -> Self {
        self.activity = Box::new(sink);
        self
    }

    // ── Phase ──────────────────────────────────────────────────────

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase == SessionPhase::Live
    }

    pub fn begin_subscribe(&mut self) {
        self.set_phase(SessionPhase::Subscribing);
    }

    pub fn mark_live(&mut self) {
        self.set_phase(SessionPhase::Live);
    }

    /// Local editing keeps working; nothing is sent or received until the
    /// session is live again, and anything missed meanwhile is gone.
    pub fn disconnect(&mut self) {
        self.set_phase(SessionPhase::Disconnected);
    }

    pub fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            log::info!("{}: {:?} -> {:?}", self.channel, self.phase, phase);
            self.phase = phase;
        }
    }

    // ── Local edits ────────────────────────────────────────────────

    /// Reset the log to a single snapshot of the current canvas.
    pub fn init(&mut self, neurons: &[Neuron], connections: &[Connection]) {
        let entry = CollaborativeHistoryEntry::new(
            &self.identity,
            CircuitState::capture(neurons, connections, INITIAL_LABEL),
        );
        self.initial_id = Some(entry.id);
        self.log.reset(entry);
        self.pending = None;
    }

    /// Record a local edit and publish it to the room. While a conflict is
    /// pending the log is frozen and this returns [`PushOutcome::Blocked`].
    pub fn push_state(&mut self, neurons: &[Neuron], connections: &[Connection], label: impl Into<String>) -> PushOutcome {
        let label = label.into();
        let outcome = self.record(neurons, connections, label.clone());
        if outcome.is_recorded() {
            self.activity.record(&Activity::EditRecorded { label });
        }
        outcome
    }

    /// Merge `incoming` into the current graph and record the result as
    /// one edit.
    pub fn import_circuit(
        &mut self,
        incoming_neurons: &[Neuron],
        incoming_connections: &[Connection],
        canvas_width: f64,
        canvas_height: f64,
        options: &MergeOptions,
    ) -> (MergeResult, PushOutcome) {
        let (existing_neurons, existing_connections) = match self.log.current() {
            Some(entry) => (entry.state.neurons.as_slice(), entry.state.connections.as_slice()),
            None => (&[][..], &[][..]),
        };
        let result = merge_circuits(
            existing_neurons,
            existing_connections,
            incoming_neurons,
            incoming_connections,
            canvas_width,
            canvas_height,
            options,
        );

        let stats = &result.stats;
        if stats.neurons_added == 0 && stats.connections_added == 0 && stats.connections_merged == 0 {
            log::debug!(
                "{}: import changed nothing ({} conflicts), not recorded",
                self.channel,
                result.conflicts.len()
            );
            return (result, PushOutcome::Unchanged);
        }

        self.log.disarm_guard();
        let outcome = self.record(&result.neurons, &result.connections, IMPORT_LABEL.to_string());
        if outcome.is_recorded() {
            self.activity.record(&Activity::CircuitImported {
                neurons_added: result.stats.neurons_added,
                conflicts: result.conflicts.len(),
            });
        }
        (result, outcome)
    }

    /// Record a persisted version as a new edit.
    pub fn restore_version(&mut self, version: &CircuitState) -> PushOutcome {
        self.log.disarm_guard();
        let outcome = self.record(
            &version.neurons,
            &version.connections,
            format!("Restored: {}", version.label),
        );
        if outcome.is_recorded() {
            self.activity.record(&Activity::VersionRestored {
                label: version.label.clone(),
            });
        }
        outcome
    }

    pub fn clear(&mut self) {
        self.log.clear();
        self.initial_id = None;
        self.pending = None;
    }

    fn record(&mut self, neurons: &[Neuron], connections: &[Connection], label: String) -> PushOutcome {
        if self.log.take_guard(neurons, connections) {
            log::trace!("{}: suppressed echo of restored state", self.channel);
            return PushOutcome::Suppressed;
        }
        if let Some(conflict) = &self.pending {
            log::warn!(
                "{}: \"{}\" not recorded, conflict with {} is unresolved",
                self.channel,
                label,
                conflict.remote.user_name
            );
            return PushOutcome::Blocked;
        }
        let entry = CollaborativeHistoryEntry::new(
            &self.identity,
            CircuitState::capture(neurons, connections, label),
        );
        let event = HistoryEvent::Action(entry.clone());
        let index = self.log.append(entry);
        self.publish(&event);
        PushOutcome::Recorded { index }
    }

    // ── Navigation ─────────────────────────────────────────────────

    pub fn undo(&mut self) -> Option<&CircuitState> {
        self.log.undo()?;
        self.announce_navigation(NavigateDirection::Undo);
        self.current()
    }

    pub fn redo(&mut self) -> Option<&CircuitState> {
        self.log.redo()?;
        self.announce_navigation(NavigateDirection::Redo);
        self.current()
    }

    pub fn jump_to_state(&mut self, index: usize) -> Option<&CircuitState> {
        let previous = self.log.current_index();
        self.log.jump_to(index)?;
        let direction = if previous.is_some_and(|p| index < p) {
            NavigateDirection::Undo
        } else {
            NavigateDirection::Redo
        };
        self.announce_navigation(direction);
        self.current()
    }

    fn announce_navigation(&self, direction: NavigateDirection) {
        let (Some(target_index), Some(entry)) = (self.log.current_index(), self.log.current()) else {
            return;
        };
        let event = HistoryEvent::Navigate(NavigatePayload {
            user_id: self.identity.user_id.clone(),
            user_name: self.identity.user_name.clone(),
            direction,
            target_index,
            state: GraphPayload::from(&entry.state),
        });
        self.publish(&event);
    }

    fn publish(&self, event: &HistoryEvent) {
        if self.phase == SessionPhase::Live {
            self.transport.publish(&self.channel, event);
        } else {
            log::debug!(
                "{}: {:?} not published while {:?}",
                self.channel,
                event.message_type(),
                self.phase
            );
        }
    }

    // ── Remote events ──────────────────────────────────────────────

    pub fn handle_remote(&mut self, event: HistoryEvent) -> RemoteOutcome {
        if self.phase != SessionPhase::Live {
            log::debug!("{}: remote {:?} dropped, not live", self.channel, event.message_type());
            return RemoteOutcome::Ignored(IgnoreReason::NotLive);
        }
        if event.author_id() == self.identity.user_id {
            return RemoteOutcome::Ignored(IgnoreReason::OwnEcho);
        }

        match event {
            HistoryEvent::Action(entry) => self.receive_action(entry),
            HistoryEvent::Navigate(nav) => {
                let label = format!("{} by {}", nav.direction, nav.user_name);
                let state = CircuitState::capture(&nav.state.neurons, &nav.state.connections, label);
                log::debug!(
                    "{}: {} navigated to #{}",
                    self.channel,
                    nav.user_name,
                    nav.target_index
                );
                self.log.arm_guard(state.clone());
                RemoteOutcome::Navigated(Reconciled::remote(state, nav.user_id, nav.user_name))
            }
        }
    }

    fn receive_action(&mut self, entry: CollaborativeHistoryEntry) -> RemoteOutcome {
        if self.pending.is_some() {
            log::warn!(
                "{}: ignoring \"{}\" from {} while a conflict is pending",
                self.channel,
                entry.action,
                entry.user_name
            );
            return RemoteOutcome::Ignored(IgnoreReason::ConflictPending);
        }

        let tail = self.log.tail().filter(|t| Some(t.id) != self.initial_id);
        if detect_conflict(tail, &self.identity.user_id, &entry, self.conflict_window_ms) {
            if let Some(local) = tail.cloned() {
                log::info!(
                    "{}: \"{}\" from {} conflicts with local \"{}\"",
                    self.channel,
                    entry.action,
                    entry.user_name,
                    local.action
                );
                let conflict = PendingConflict { local, remote: entry };
                self.pending = Some(conflict.clone());
                return RemoteOutcome::Conflict(conflict);
            }
        }

        let notification = Notification {
            user_id: entry.user_id.clone(),
            user_name: entry.user_name.clone(),
            action: entry.action.clone(),
        };
        let update = self.apply_remote(entry);
        RemoteOutcome::Applied { update, notification }
    }

    fn apply_remote(&mut self, entry: CollaborativeHistoryEntry) -> Reconciled<CircuitState> {
        let update = Reconciled::remote(entry.state.clone(), &entry.user_id, &entry.user_name);
        log::debug!("{}: applied \"{}\" from {}", self.channel, entry.action, entry.user_name);
        self.log.arm_guard(entry.state.clone());
        self.log.append(entry);
        update
    }

    /// Settle the pending conflict. Returns `None` if nothing was pending.
    pub fn resolve_conflict(&mut self, keep_local: bool) -> Option<Resolution> {
        let conflict = self.pending.take()?;
        self.activity.record(&Activity::ConflictResolved { kept_local: keep_local });

        if keep_local {
            log::debug!("{}: kept local \"{}\"", self.channel, conflict.local.action);
            return Some(Resolution::KeptLocal);
        }

        if self.log.tail().map(|t| t.id) == Some(conflict.local.id) {
            self.log.discard_tail();
        }
        Some(Resolution::AcceptedRemote(self.apply_remote(conflict.remote)))
    }

    pub fn pending_conflict(&self) -> Option<&PendingConflict> {
        self.pending.as_ref()
    }

    // ── Views ──────────────────────────────────────────────────────

    pub fn timeline(&self, now: u64) -> Vec<TimelineRow> {
        project(
            self.log.entries(),
            self.log.current_index(),
            Some(self.identity.user_id.as_str()),
            now,
        )
    }

    pub fn timeline_groups(&self, now: u64) -> Vec<TimelineGroup> {
        group_by_bucket(self.timeline(now))
    }

    pub fn current(&self) -> Option<&CircuitState> {
        self.log.current().map(|e| &e.state)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.log.current_index()
    }

    pub fn entries(&self) -> &[CollaborativeHistoryEntry] {
        self.log.entries()
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

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurolab_core::{ConnectionType, NeuronKind, Position, now_millis};
    use std::cell::RefCell;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingTransport {
        sent: RefCell<Vec<(String, HistoryEvent)>>,
    }

    impl RecordingTransport {
        fn take(&self) -> Vec<(String, HistoryEvent)> {
            self.sent.borrow_mut().drain(..).collect()
        }
    }

    impl HistoryTransport for RecordingTransport {
        fn publish(&self, channel: &str, event: &HistoryEvent) {
            self.sent.borrow_mut().push((channel.to_string(), event.clone()));
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<Activity>>>);

    impl ActivitySink for RecordingSink {
        fn record(&self, activity: &Activity) {
            self.0.lock().unwrap().push(activity.clone());
        }
    }

    fn graph(n: usize) -> Vec<Neuron> {
        (0..n)
            .map(|i| Neuron::new(format!("n{i}"), NeuronKind::Excitatory, i as f64 * 80.0 + 40.0, 40.0))
            .collect()
    }

    fn live(transport: &RecordingTransport) -> CollaborativeHistory<&RecordingTransport> {
        let mut session = CollaborativeHistory::new(
            Identity::new("alice", "Alice"),
            "lab",
            &SessionConfig::default(),
            transport,
        );
        session.init(&[], &[]);
        session.mark_live();
        session
    }

    fn remote_entry(label: &str, neurons: usize, timestamp: u64) -> CollaborativeHistoryEntry {
        CollaborativeHistoryEntry {
            id: Uuid::new_v4(),
            user_id: "bob".into(),
            user_name: "Bob".into(),
            action: label.into(),
            state: CircuitState::capture_at(&graph(neurons), &[], label, timestamp),
        }
    }

    #[test]
    fn test_push_broadcasts_full_entry() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);

        let outcome = session.push_state(&graph(2), &[], "Added neuron");
        assert_eq!(outcome, PushOutcome::Recorded { index: 1 });

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "circuit-history-lab");
        match &sent[0].1 {
            HistoryEvent::Action(entry) => {
                assert_eq!(entry.user_id, "alice");
                assert_eq!(entry.action, "Added neuron");
                assert_eq!(entry.state.neurons.len(), 2);
                assert_eq!(entry, &session.entries()[1]);
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn test_nothing_published_unless_live() {
        let transport = RecordingTransport::default();
        let mut session = CollaborativeHistory::new(
            Identity::new("alice", "Alice"),
            "lab",
            &SessionConfig::default(),
            &transport,
        );
        session.init(&[], &[]);
        session.begin_subscribe();
        session.push_state(&graph(1), &[], "offline edit");
        session.undo();

        assert!(transport.take().is_empty());
        assert_eq!(session.len(), 2);
        assert_eq!(session.current_index(), Some(0));
    }

    #[test]
    fn test_navigation_broadcasts_target_and_graph() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);
        session.push_state(&graph(1), &[], "A");
        session.push_state(&graph(2), &[], "B");
        transport.take();

        session.undo();
        session.redo();
        session.jump_to_state(0);
        session.jump_to_state(2);
        assert!(session.jump_to_state(9).is_none());

        let navs: Vec<(NavigateDirection, usize, usize)> = transport
            .take()
            .into_iter()
            .map(|(_, event)| match event {
                HistoryEvent::Navigate(nav) => (nav.direction, nav.target_index, nav.state.neurons.len()),
                other => panic!("expected navigate, got {other:?}"),
            })
            .collect();
        assert_eq!(
            navs,
            vec![
                (NavigateDirection::Undo, 1, 1),
                (NavigateDirection::Redo, 2, 2),
                (NavigateDirection::Undo, 0, 0),
                (NavigateDirection::Redo, 2, 2),
            ]
        );
    }

    #[test]
    fn test_boundary_navigation_sends_nothing() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);
        assert!(session.undo().is_none());
        assert!(session.redo().is_none());
        assert!(transport.take().is_empty());
    }

    #[test]
    fn test_remote_action_applied_and_echo_suppressed() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);
        let entry = remote_entry("Bob added neuron", 3, now_millis());

        let outcome = session.handle_remote(HistoryEvent::Action(entry.clone()));
        match &outcome {
            RemoteOutcome::Applied { update, notification } => {
                assert!(update.is_remote());
                assert_eq!(update.value, entry.state);
                assert_eq!(notification.to_string(), "Bob: Bob added neuron");
            }
            other => panic!("expected applied, got {other:?}"),
        }
        assert_eq!(session.entries().last(), Some(&entry));

        // The canvas renders the graph and reports it back.
        let graph = outcome.graph().unwrap().clone();
        assert_eq!(
            session.push_state(&graph.neurons, &graph.connections, "canvas sync"),
            PushOutcome::Suppressed
        );
        assert!(transport.take().is_empty());
    }

    #[test]
    fn test_remote_action_truncates_redo_branch() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);
        session.push_state(&graph(1), &[], "A");
        session.push_state(&graph(2), &[], "B");
        session.undo();

        let entry = remote_entry("remote", 5, now_millis() + 60_000);
        session.handle_remote(HistoryEvent::Action(entry));

        let labels: Vec<&str> = session.entries().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(labels, vec![INITIAL_LABEL, "A", "remote"]);
        assert!(!session.can_redo());
    }

    #[test]
    fn test_ignored_events() {
        let transport = RecordingTransport::default();
        let mut session = CollaborativeHistory::new(
            Identity::new("alice", "Alice"),
            "lab",
            &SessionConfig::default(),
            &transport,
        );
        session.init(&[], &[]);
        let entry = remote_entry("x", 1, 0);
        assert_eq!(
            session.handle_remote(HistoryEvent::Action(entry.clone())),
            RemoteOutcome::Ignored(IgnoreReason::NotLive)
        );

        session.mark_live();
        let mut own = entry;
        own.user_id = "alice".into();
        assert_eq!(
            session.handle_remote(HistoryEvent::Action(own)),
            RemoteOutcome::Ignored(IgnoreReason::OwnEcho)
        );
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_remote_navigate_renders_without_touching_log() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);
        session.push_state(&graph(1), &[], "A");

        let outcome = session.handle_remote(HistoryEvent::Navigate(NavigatePayload {
            user_id: "bob".into(),
            user_name: "Bob".into(),
            direction: NavigateDirection::Undo,
            target_index: 0,
            state: GraphPayload { neurons: graph(4), connections: vec![] },
        }));

        let RemoteOutcome::Navigated(update) = outcome else {
            panic!("expected navigated");
        };
        assert_eq!(update.value.neurons.len(), 4);
        assert_eq!(update.value.label, "undo by Bob");
        assert_eq!(session.len(), 2);
        assert_eq!(session.current_index(), Some(1));
    }

    #[test]
    fn test_detect_conflict_window() {
        let identity = Identity::new("alice", "Alice");
        let local = CollaborativeHistoryEntry::new(
            &identity,
            CircuitState::capture_at(&[], &[], "local", 10_000),
        );

        assert!(detect_conflict(Some(&local), "alice", &remote_entry("r", 1, 11_000), 1000));
        assert!(detect_conflict(Some(&local), "alice", &remote_entry("r", 1, 9_000), 1000));
        assert!(!detect_conflict(Some(&local), "alice", &remote_entry("r", 1, 11_001), 1000));
        assert!(!detect_conflict(None, "alice", &remote_entry("r", 1, 10_000), 1000));

        // Tail authored by somebody else is never ours to defend.
        let other_tail = remote_entry("b", 1, 10_000);
        assert!(!detect_conflict(Some(&other_tail), "alice", &remote_entry("r", 1, 10_000), 1000));
    }

    #[test]
    fn test_initial_snapshot_never_conflicts() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);
        let entry = remote_entry("right away", 1, now_millis());

        assert!(matches!(
            session.handle_remote(HistoryEvent::Action(entry)),
            RemoteOutcome::Applied { .. }
        ));
    }

    fn conflicted(transport: &RecordingTransport) -> (CollaborativeHistory<&RecordingTransport>, CollaborativeHistoryEntry) {
        let mut session = live(transport);
        session.push_state(&graph(1), &[], "base");
        session.push_state(&graph(2), &[], "local edit");
        let local_ts = session.entries()[2].timestamp();
        let remote = remote_entry("remote edit", 7, local_ts + 400);

        let outcome = session.handle_remote(HistoryEvent::Action(remote.clone()));
        assert!(matches!(outcome, RemoteOutcome::Conflict(_)));
        (session, remote)
    }

    #[test]
    fn test_conflict_keep_local() {
        let transport = RecordingTransport::default();
        let (mut session, _) = conflicted(&transport);
        let before: Vec<CollaborativeHistoryEntry> = session.entries().to_vec();

        assert_eq!(session.resolve_conflict(true), Some(Resolution::KeptLocal));
        assert_eq!(session.entries(), before.as_slice());
        assert_eq!(session.current().unwrap().label, "local edit");
        assert!(session.pending_conflict().is_none());
        assert!(session.resolve_conflict(true).is_none());
    }

    #[test]
    fn test_conflict_accept_remote() {
        let transport = RecordingTransport::default();
        let (mut session, remote) = conflicted(&transport);

        let Some(Resolution::AcceptedRemote(update)) = session.resolve_conflict(false) else {
            panic!("expected remote accepted");
        };
        assert_eq!(update.value, remote.state);

        let labels: Vec<&str> = session.entries().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(labels, vec![INITIAL_LABEL, "base", "remote edit"]);
        assert_eq!(session.current().unwrap().neurons.len(), 7);
    }

    #[test]
    fn test_pending_conflict_blocks_actions_not_navigation() {
        let transport = RecordingTransport::default();
        let (mut session, _) = conflicted(&transport);
        let len = session.len();

        let later = remote_entry("later", 2, now_millis() + 5_000);
        assert_eq!(
            session.handle_remote(HistoryEvent::Action(later)),
            RemoteOutcome::Ignored(IgnoreReason::ConflictPending)
        );
        let nav = session.handle_remote(HistoryEvent::Navigate(NavigatePayload {
            user_id: "bob".into(),
            user_name: "Bob".into(),
            direction: NavigateDirection::Redo,
            target_index: 1,
            state: GraphPayload { neurons: graph(1), connections: vec![] },
        }));
        assert!(matches!(nav, RemoteOutcome::Navigated(_)));
        assert_eq!(session.len(), len);
    }

    #[test]
    fn test_local_edits_blocked_while_conflict_pending() {
        let transport = RecordingTransport::default();
        let (mut session, remote) = conflicted(&transport);
        transport.take();

        assert_eq!(session.push_state(&graph(3), &[], "edit while pending"), PushOutcome::Blocked);
        let saved = CircuitState::capture(&graph(4), &[], "saved");
        assert_eq!(session.restore_version(&saved), PushOutcome::Blocked);
        let incoming = vec![Neuron::new("fresh", NeuronKind::Motor, 600.0, 600.0)];
        let (_, outcome) = session.import_circuit(&incoming, &[], 1000.0, 800.0, &MergeOptions::default());
        assert_eq!(outcome, PushOutcome::Blocked);
        assert!(transport.take().is_empty());

        session.resolve_conflict(false);
        let labels: Vec<&str> = session.entries().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(labels, vec![INITIAL_LABEL, "base", "remote edit"]);
        assert_eq!(session.entries().last(), Some(&remote));

        // Unfrozen again.
        assert!(session.push_state(&graph(3), &[], "after").is_recorded());
    }

    #[test]
    fn test_import_that_changes_nothing_is_not_recorded() {
        let transport = RecordingTransport::default();
        let sink = RecordingSink::default();
        let mut session = live(&transport).with_activity_sink(sink.clone());
        session.push_state(&graph(2), &[], "A");
        transport.take();

        // Every incoming neuron is a duplicate and gets skipped.
        let (result, outcome) = session.import_circuit(&graph(2), &[], 1000.0, 800.0, &MergeOptions::default());
        assert_eq!(outcome, PushOutcome::Unchanged);
        assert_eq!(result.stats.neurons_skipped, 2);
        assert_eq!(result.conflicts.len(), 2);
        assert_eq!(session.len(), 2);
        assert!(transport.take().is_empty());
        assert!(sink.0.lock().unwrap().iter().all(|a| !matches!(a, Activity::CircuitImported { .. })));
    }

    #[test]
    fn test_import_circuit_records_merge() {
        let transport = RecordingTransport::default();
        let sink = RecordingSink::default();
        let mut session = live(&transport).with_activity_sink(sink.clone());
        session.push_state(&graph(1), &[], "A");
        transport.take();

        let incoming = vec![
            Neuron::new("n0", NeuronKind::Motor, 500.0, 500.0),
            Neuron::new("x", NeuronKind::Sensory, 300.0, 300.0),
        ];
        let links = vec![Connection::between("n0", "x", 1.0, ConnectionType::Excitatory)];
        let (result, outcome) = session.import_circuit(&incoming, &links, 1000.0, 800.0, &MergeOptions::default());

        assert!(outcome.is_recorded());
        assert_eq!(result.stats.neurons_added, 1);
        assert_eq!(result.conflicts.len(), 1);
        let current = session.current().unwrap();
        assert_eq!(current.label, IMPORT_LABEL);
        assert_eq!(current.neurons.len(), 2);
        assert_eq!(current.neuron("n0").unwrap().position(), Position::new(40.0, 40.0));
        assert_eq!(transport.take().len(), 1);

        let activity = sink.0.lock().unwrap().clone();
        assert_eq!(
            activity.last(),
            Some(&Activity::CircuitImported { neurons_added: 1, conflicts: 1 })
        );
    }

    #[test]
    fn test_restore_after_undo_is_recorded() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);
        session.push_state(&graph(1), &[], "A");
        session.push_state(&graph(2), &[], "B");
        let saved = session.undo().unwrap().clone();

        assert!(session.restore_version(&saved).is_recorded());
        assert_eq!(session.current().unwrap().label, "Restored: A");
        assert!(!session.can_redo());
    }

    #[test]
    fn test_timeline_flags() {
        let transport = RecordingTransport::default();
        let mut session = live(&transport);
        session.push_state(&graph(1), &[], "mine");
        session.handle_remote(HistoryEvent::Action(remote_entry("theirs", 2, now_millis() + 60_000)));
        session.undo();

        let rows = session.timeline(now_millis());
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_own && rows[1].is_own && !rows[2].is_own);
        assert!(rows[1].is_current);
        assert_eq!(rows[2].author_name.as_deref(), Some("Bob"));
        assert!(!session.timeline_groups(now_millis()).is_empty());
    }

    #[test]
    fn test_clear_drops_pending() {
        let transport = RecordingTransport::default();
        let (mut session, _) = conflicted(&transport);
        session.clear();
        assert!(session.is_empty());
        assert!(session.pending_conflict().is_none());
    }
}
