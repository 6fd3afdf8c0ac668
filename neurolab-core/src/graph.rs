//! Circuit graph model shared by the merge engine, the history log and
//! the collaboration layer.
//!
//! A circuit is a flat list of neurons plus a flat list of directed,
//! weighted connections. Everything here is a plain value: cloning a
//! [`CircuitState`] yields a fully independent copy, which is what makes
//! history entries immutable once recorded.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::SystemTime;
use thiserror::Error;

pub type NeuronId = String;

// ───────────────────────────────────────────────────────────────────
// Neurons
// ───────────────────────────────────────────────────────────────────

/// Neuron category. The biological catalog behind each kind lives
/// outside this crate; only the tag travels with the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuronKind {
    Sensory,
    Motor,
    Interneuron,
    Excitatory,
    Inhibitory,
    Modulatory,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Neuron {
    pub id: NeuronId,
    pub kind: NeuronKind,
    pub x: f64,
    pub y: f64,
    pub is_active: Option<bool>,
}

impl Neuron {
    pub fn new(id: impl Into<NeuronId>, kind: NeuronKind, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            x,
            y,
            is_active: None,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn move_to(&mut self, position: Position) {
        self.x = position.x;
        self.y = position.y;
    }
}

/// Canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

// ───────────────────────────────────────────────────────────────────
// Connections
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Excitatory,
    Inhibitory,
    Modulatory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub from: NeuronId,
    pub to: NeuronId,
    pub weight: f64,
    #[serde(rename = "type")]
    pub kind: ConnectionType,
}

impl Connection {
    /// Build a connection whose id is the plain `"{from}-{to}"` form.
    pub fn between(
        from: impl Into<NeuronId>,
        to: impl Into<NeuronId>,
        weight: f64,
        kind: ConnectionType,
    ) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{from}-{to}"),
            from,
            to,
            weight,
            kind,
        }
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

/// Identity of an edge for merge purposes: the `(from, to)` pair,
/// independent of the connection's own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub from: NeuronId,
    pub to: NeuronId,
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

// ───────────────────────────────────────────────────────────────────
// Snapshots
// ───────────────────────────────────────────────────────────────────

/// Self-contained copy of a circuit at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitState {
    pub neurons: Vec<Neuron>,
    pub connections: Vec<Connection>,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub label: String,
}

impl CircuitState {
    /// Capture a snapshot, copying the live graph.
    pub fn capture(neurons: &[Neuron], connections: &[Connection], label: impl Into<String>) -> Self {
        Self::capture_at(neurons, connections, label, now_millis())
    }

    pub fn capture_at(
        neurons: &[Neuron],
        connections: &[Connection],
        label: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            neurons: neurons.to_vec(),
            connections: connections.to_vec(),
            timestamp,
            label: label.into(),
        }
    }

    pub fn empty(label: impl Into<String>) -> Self {
        Self::capture(&[], &[], label)
    }

    /// True when the graph content matches, ignoring label and timestamp.
    pub fn same_graph(&self, neurons: &[Neuron], connections: &[Connection]) -> bool {
        self.neurons == neurons && self.connections == connections
    }

    pub fn neuron(&self, id: &str) -> Option<&Neuron> {
        self.neurons.iter().find(|n| n.id == id)
    }

    pub fn contains_neuron(&self, id: &str) -> bool {
        self.neuron(id).is_some()
    }

    pub fn connection(&self, from: &str, to: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.from == from && c.to == to)
    }

    pub fn orphan_connections(&self) -> Vec<&Connection> {
        orphan_connections(&self.neurons, &self.connections)
    }

    pub fn validate(&self) -> Vec<GraphIssue> {
        validate(&self.neurons, &self.connections)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ───────────────────────────────────────────────────────────────────
// Queries
// ───────────────────────────────────────────────────────────────────

/// Structural problems a graph can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    DuplicateNeuron(NeuronId),
    DuplicateConnection(ConnectionKey),
    OrphanConnection { id: String, missing: NeuronId },
}

/// Connections whose `from` or `to` endpoint is not among `neurons`.
pub fn orphan_connections<'a>(neurons: &[Neuron], connections: &'a [Connection]) -> Vec<&'a Connection> {
    let ids: HashSet<&str> = neurons.iter().map(|n| n.id.as_str()).collect();
    connections
        .iter()
        .filter(|c| !ids.contains(c.from.as_str()) || !ids.contains(c.to.as_str()))
        .collect()
}

pub fn validate(neurons: &[Neuron], connections: &[Connection]) -> Vec<GraphIssue> {
    let mut issues = Vec::new();

    let mut ids = HashSet::new();
    for neuron in neurons {
        if !ids.insert(neuron.id.as_str()) {
            issues.push(GraphIssue::DuplicateNeuron(neuron.id.clone()));
        }
    }

    let mut keys = HashSet::new();
    for conn in connections {
        if !keys.insert(conn.key()) {
            issues.push(GraphIssue::DuplicateConnection(conn.key()));
        }
        for endpoint in [&conn.from, &conn.to] {
            if !ids.contains(endpoint.as_str()) {
                issues.push(GraphIssue::OrphanConnection {
                    id: conn.id.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
    }

    issues
}

/// Wall-clock milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
