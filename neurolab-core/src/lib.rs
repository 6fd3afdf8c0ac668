//! # neurolab-core: circuit model, merge and history
//!
//! Pure, synchronous building blocks for editing neural circuits:
//!
//! ```text
//! canvas edit ──► HistoryStack::push ──► immutable CircuitState snapshot
//!                       │
//!                       ├── undo / redo / jump ──► snapshot back to canvas
//!                       │
//! shared circuit ──► merge_circuits ──► MergeResult { graph, conflicts, stats }
//! ```
//!
//! ## Modules
//!
//! - [`graph`]: neurons, connections, snapshots and graph queries
//! - [`merge`]: deterministic two-graph merge with conflict report
//! - [`history`]: linear undo/redo log and the bookmarkable local stack
//! - [`timeline`]: display rows for a history log
//! - [`config`]: history settings
//!
//! Nothing here performs I/O; the collaboration crate builds the
//! networked layer on top.

pub mod config;
pub mod graph;
pub mod history;
pub mod merge;
pub mod timeline;

pub use config::HistoryConfig;
pub use graph::{
    CircuitState, Connection, ConnectionKey, ConnectionType, GraphIssue, Neuron, NeuronId,
    NeuronKind, Position, SnapshotError, now_millis,
};
pub use history::{
    Bookmark, HistoryEntry, HistoryLog, HistoryRecord, HistoryStack, HistorySummary,
    PushOutcome, SummaryItem,
};
pub use merge::{
    ConflictKind, MergeConflict, MergeOptions, MergeResult, MergeStats, Strategy, merge_circuits,
};
pub use timeline::{TimeBucket, TimelineGroup, TimelineRow, group_by_bucket, project};
