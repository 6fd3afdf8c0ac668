//! Deterministic merge of two independently authored circuits.
//!
//! Used when a shared circuit is imported into the current canvas or a
//! historical version is merged back in. Inputs are read-only and the
//! result is a fresh graph, so the same inputs can be merged repeatedly
//! under different strategies.
//!
//! ```text
//! existing ──► seed merged set
//!                 │
//! incoming neurons ──► duplicate id? ── replace / skip
//!                 │        │
//!                 │        └─ new id ── overlaps? ── golden-angle spiral
//!                 ▼
//! incoming connections ──► orphan? ── drop
//!                              │
//!                              └─ duplicate (from,to)? ── replace / skip
//!                                         │
//!                                         └─ new ── unique "{from}-{to}[-n]" id
//! ```
//!
//! Conflicts are collected as data and returned, never raised.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::graph::{Connection, ConnectionKey, Neuron, Position};

/// Two neurons closer than this on both axes overlap.
pub const OVERLAP_THRESHOLD: f64 = 40.0;
/// Relocated neurons stay this far inside the canvas edges.
pub const EDGE_MARGIN: f64 = 30.0;
/// Spiral search budget per neuron.
pub const SPIRAL_ATTEMPTS: u32 = 20;

const SPIRAL_STEP: f64 = 50.0;
const GOLDEN_ANGLE_DEG: f64 = 137.5;
const FALLBACK_OFFSET: f64 = 60.0;

// ───────────────────────────────────────────────────────────────────
// Options
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Skip,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeOptions {
    pub neuron_conflict_strategy: Strategy,
    pub connection_conflict_strategy: Strategy,
    /// Static shift applied to overlapping neurons when `auto_offset` is off.
    pub position_offset: Position,
    pub auto_offset: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            neuron_conflict_strategy: Strategy::Skip,
            connection_conflict_strategy: Strategy::Skip,
            position_offset: Position::new(50.0, 50.0),
            auto_offset: true,
        }
    }
}

impl MergeOptions {
    /// Incoming data wins every collision.
    pub fn replace_all() -> Self {
        Self {
            neuron_conflict_strategy: Strategy::Replace,
            connection_conflict_strategy: Strategy::Replace,
            ..Self::default()
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Result types
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    DuplicateNeuron,
    DuplicateConnection,
    PositionOverlap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub description: String,
    pub existing_id: String,
    pub incoming_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub neurons_added: usize,
    pub neurons_skipped: usize,
    pub connections_added: usize,
    pub connections_skipped: usize,
    pub connections_merged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub neurons: Vec<Neuron>,
    pub connections: Vec<Connection>,
    pub conflicts: Vec<MergeConflict>,
    pub stats: MergeStats,
}

impl MergeResult {
    /// True if the merge met no collisions at all.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn conflicts_of(&self, kind: ConflictKind) -> impl Iterator<Item = &MergeConflict> {
        self.conflicts.iter().filter(move |c| c.kind == kind)
    }
}

// ───────────────────────────────────────────────────────────────────
// Merge
// ───────────────────────────────────────────────────────────────────

/// Merge `incoming` into `existing`.
///
/// The existing graph seeds the result unchanged; incoming neurons are
/// then folded in by id, incoming connections by `(from, to)`. Incoming
/// connections whose endpoints are missing from the merged neuron set are
/// dropped without a conflict, whatever the strategy.
pub fn merge_circuits(
    existing_neurons: &[Neuron],
    existing_connections: &[Connection],
    incoming_neurons: &[Neuron],
    incoming_connections: &[Connection],
    canvas_width: f64,
    canvas_height: f64,
    options: &MergeOptions,
) -> MergeResult {
    let mut neurons = existing_neurons.to_vec();
    let mut connections = existing_connections.to_vec();
    let mut conflicts = Vec::new();
    let mut stats = MergeStats::default();

    let mut known: HashMap<String, usize> = neurons
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();

    for incoming in incoming_neurons {
        if let Some(&idx) = known.get(&incoming.id) {
            conflicts.push(MergeConflict {
                kind: ConflictKind::DuplicateNeuron,
                description: format!("Neuron \"{}\" already exists in the circuit", incoming.id),
                existing_id: neurons[idx].id.clone(),
                incoming_id: incoming.id.clone(),
            });
            match options.neuron_conflict_strategy {
                Strategy::Replace => {
                    neurons[idx] = incoming.clone();
                    stats.neurons_added += 1;
                }
                Strategy::Skip => stats.neurons_skipped += 1,
            }
            log::debug!(
                "merge: duplicate neuron {} ({:?})",
                incoming.id,
                options.neuron_conflict_strategy
            );
            continue;
        }

        let mut placed = incoming.clone();
        let origin = incoming.position();
        if let Some(blocker) = find_overlap(&neurons, origin) {
            if options.auto_offset {
                let target = find_free_position(&neurons, origin, canvas_width, canvas_height);
                conflicts.push(MergeConflict {
                    kind: ConflictKind::PositionOverlap,
                    description: format!(
                        "Neuron \"{}\" overlapped \"{}\"; moved from ({:.0}, {:.0}) to ({:.0}, {:.0})",
                        incoming.id, neurons[blocker].id, origin.x, origin.y, target.x, target.y
                    ),
                    existing_id: neurons[blocker].id.clone(),
                    incoming_id: incoming.id.clone(),
                });
                placed.move_to(target);
            } else {
                placed.move_to(origin.offset(options.position_offset.x, options.position_offset.y));
            }
        }

        known.insert(placed.id.clone(), neurons.len());
        neurons.push(placed);
        stats.neurons_added += 1;
    }

    let mut by_key: HashMap<ConnectionKey, usize> = connections
        .iter()
        .enumerate()
        .map(|(i, c)| (c.key(), i))
        .collect();
    let mut used_ids: HashSet<String> = connections.iter().map(|c| c.id.clone()).collect();

    for incoming in incoming_connections {
        if !known.contains_key(&incoming.from) || !known.contains_key(&incoming.to) {
            log::debug!("merge: dropping orphan connection {}", incoming.id);
            stats.connections_skipped += 1;
            continue;
        }

        let key = incoming.key();
        if let Some(&idx) = by_key.get(&key) {
            conflicts.push(MergeConflict {
                kind: ConflictKind::DuplicateConnection,
                description: format!("Connection {key} already exists in the circuit"),
                existing_id: connections[idx].id.clone(),
                incoming_id: incoming.id.clone(),
            });
            match options.connection_conflict_strategy {
                Strategy::Replace => {
                    let existing = &mut connections[idx];
                    existing.weight = incoming.weight;
                    existing.kind = incoming.kind;
                    stats.connections_merged += 1;
                }
                Strategy::Skip => stats.connections_skipped += 1,
            }
            continue;
        }

        let id = unique_connection_id(&used_ids, &incoming.from, &incoming.to);
        used_ids.insert(id.clone());
        by_key.insert(key, connections.len());
        connections.push(Connection {
            id,
            from: incoming.from.clone(),
            to: incoming.to.clone(),
            weight: incoming.weight,
            kind: incoming.kind,
        });
        stats.connections_added += 1;
    }

    log::debug!(
        "merge: +{} neurons ({} skipped), +{} connections ({} skipped, {} merged), {} conflicts",
        stats.neurons_added,
        stats.neurons_skipped,
        stats.connections_added,
        stats.connections_skipped,
        stats.connections_merged,
        conflicts.len()
    );

    MergeResult {
        neurons,
        connections,
        conflicts,
        stats,
    }
}

/// Index of the first neuron overlapping `position`, if any.
pub fn find_overlap(neurons: &[Neuron], position: Position) -> Option<usize> {
    neurons.iter().position(|n| {
        (n.x - position.x).abs() < OVERLAP_THRESHOLD && (n.y - position.y).abs() < OVERLAP_THRESHOLD
    })
}

/// Golden-angle spiral search around `origin` for a free slot.
///
/// Attempt `k` sits at angle `k * 137.5°` and radius `50 * sqrt(k)`, clamped
/// inside the canvas margin. After the attempt budget the `(+60, +60)`
/// fallback is returned, clamped the same way.
pub fn find_free_position(neurons: &[Neuron], origin: Position, canvas_width: f64, canvas_height: f64) -> Position {
    for k in 1..=SPIRAL_ATTEMPTS {
        let k = f64::from(k);
        let angle = (k * GOLDEN_ANGLE_DEG).to_radians();
        let radius = SPIRAL_STEP * k.sqrt();
        let candidate = clamp_to_canvas(
            Position::new(origin.x + radius * angle.cos(), origin.y + radius * angle.sin()),
            canvas_width,
            canvas_height,
        );
        if find_overlap(neurons, candidate).is_none() {
            return candidate;
        }
    }

    clamp_to_canvas(
        origin.offset(FALLBACK_OFFSET, FALLBACK_OFFSET),
        canvas_width,
        canvas_height,
    )
}

fn clamp_to_canvas(position: Position, canvas_width: f64, canvas_height: f64) -> Position {
    Position::new(
        clamp_axis(position.x, canvas_width),
        clamp_axis(position.y, canvas_height),
    )
}

// `f64::clamp` panics when the canvas is narrower than twice the margin.
fn clamp_axis(value: f64, extent: f64) -> f64 {
    let hi = (extent - EDGE_MARGIN).max(0.0);
    value.max(EDGE_MARGIN).min(hi)
}

fn unique_connection_id(used: &HashSet<String>, from: &str, to: &str) -> String {
    let base = format!("{from}-{to}");
    if !used.contains(&base) {
        return base;
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !used.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
