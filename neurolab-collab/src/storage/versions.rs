use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use neurolab_core::{CircuitState, GraphIssue, SnapshotError, now_millis};

/// Describes one stored version. Versions of a circuit are numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub circuit_id: String,
    pub version: u64,
    pub title: String,
    pub description: Option<String>,
    /// Label of the snapshot that was saved.
    pub label: String,
    pub neuron_count: u64,
    pub connection_count: u64,
    /// Uncompressed JSON size in bytes
    pub snapshot_size: u64,
    pub compressed_size: u64,
    /// Milliseconds since epoch
    pub created_at: u64,
}

impl VersionMetadata {
    pub(crate) fn new(
        circuit_id: &str,
        version: u64,
        title: &str,
        description: Option<&str>,
        state: &CircuitState,
    ) -> Self {
        Self {
            circuit_id: circuit_id.to_string(),
            version,
            title: title.to_string(),
            description: description.map(str::to_string),
            label: state.label.clone(),
            neuron_count: state.neurons.len() as u64,
            connection_count: state.connections.len() as u64,
            snapshot_size: 0,
            compressed_size: 0,
            created_at: now_millis(),
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitVersion {
    pub metadata: VersionMetadata,
    pub state: CircuitState,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),
    #[error("Version {version} of circuit \"{circuit_id}\" not found")]
    NotFound { circuit_id: String, version: u64 },
    #[error("Invalid circuit id \"{0}\"")]
    InvalidCircuitId(String),
    #[error("Refusing to store a graph with {} structural issue(s)", .0.len())]
    InvalidGraph(Vec<GraphIssue>),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Store lock poisoned")]
    Poisoned,
    #[error("Column family '{0}' not found")]
    MissingColumnFamily(&'static str),
}

/// Persistent numbered versions per circuit.
pub trait VersionStore {
    /// Store `state` as the next version of `circuit_id`.
    fn save_version(
        &self,
        circuit_id: &str,
        title: &str,
        description: Option<&str>,
        state: &CircuitState,
    ) -> Result<VersionMetadata, StoreError>;

    fn load_version(&self, circuit_id: &str, version: u64) -> Result<CircuitVersion, StoreError>;

    /// Oldest first.
    fn list_versions(&self, circuit_id: &str) -> Result<Vec<VersionMetadata>, StoreError>;

    fn latest_version(&self, circuit_id: &str) -> Result<Option<CircuitVersion>, StoreError>;

    fn list_circuits(&self) -> Result<Vec<String>, StoreError>;

    /// Remove every version of `circuit_id`. Returns how many were removed.
    fn delete_circuit(&self, circuit_id: &str) -> Result<usize, StoreError>;
}

/// LZ4-compressed JSON of the snapshot.
pub fn encode_snapshot(state: &CircuitState) -> Result<Vec<u8>, StoreError> {
    let json = state.to_json()?;
    Ok(lz4_flex::compress_prepend_size(json.as_bytes()))
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<CircuitState, StoreError> {
    let json = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    let text = std::str::from_utf8(&json).map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(CircuitState::from_json(text)?)
}

/// Rejects ids the key layout cannot hold and graphs that break the
/// connection-endpoint invariant.
pub(crate) fn check_input(circuit_id: &str, state: &CircuitState) -> Result<(), StoreError> {
    if circuit_id.is_empty() || circuit_id.as_bytes().contains(&0) {
        return Err(StoreError::InvalidCircuitId(circuit_id.to_string()));
    }
    let issues = state.validate();
    if !issues.is_empty() {
        return Err(StoreError::InvalidGraph(issues));
    }
    Ok(())
}

type StoredVersion = (VersionMetadata, Vec<u8>);

/// Process-local store, for tests and single-session tools.
#[derive(Default)]
pub struct MemoryVersionStore {
    circuits: Mutex<HashMap<String, BTreeMap<u64, StoredVersion>>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn circuits(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BTreeMap<u64, StoredVersion>>>, StoreError> {
        self.circuits.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl VersionStore for MemoryVersionStore {
    fn save_version(
        &self,
        circuit_id: &str,
        title: &str,
        description: Option<&str>,
        state: &CircuitState,
    ) -> Result<VersionMetadata, StoreError> {
        check_input(circuit_id, state)?;
        let json_len = state.to_json()?.len() as u64;
        let compressed = encode_snapshot(state)?;

        let mut circuits = self.circuits()?;
        let versions = circuits.entry(circuit_id.to_string()).or_default();
        let next = versions.keys().next_back().map_or(1, |v| v + 1);

        let mut meta = VersionMetadata::new(circuit_id, next, title, description, state);
        meta.snapshot_size = json_len;
        meta.compressed_size = compressed.len() as u64;
        versions.insert(next, (meta.clone(), compressed));
        Ok(meta)
    }

    fn load_version(&self, circuit_id: &str, version: u64) -> Result<CircuitVersion, StoreError> {
        let circuits = self.circuits()?;
        let (metadata, bytes) = circuits
            .get(circuit_id)
            .and_then(|versions| versions.get(&version))
            .ok_or_else(|| StoreError::NotFound {
                circuit_id: circuit_id.to_string(),
                version,
            })?;
        Ok(CircuitVersion {
            metadata: metadata.clone(),
            state: decode_snapshot(bytes)?,
        })
    }

    fn list_versions(&self, circuit_id: &str) -> Result<Vec<VersionMetadata>, StoreError> {
        Ok(self
            .circuits()?
            .get(circuit_id)
            .map(|versions| versions.values().map(|(meta, _)| meta.clone()).collect())
            .unwrap_or_default())
    }

    fn latest_version(&self, circuit_id: &str) -> Result<Option<CircuitVersion>, StoreError> {
        let latest = self
            .circuits()?
            .get(circuit_id)
            .and_then(|versions| versions.keys().next_back().copied());
        latest.map(|v| self.load_version(circuit_id, v)).transpose()
    }

    fn list_circuits(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.circuits()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn delete_circuit(&self, circuit_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .circuits()?
            .remove(circuit_id)
            .map_or(0, |versions| versions.len()))
    }
}
