//! RocksDB-backed version store.
//!
//! Column families:
//! - `versions`: snapshots, LZ4-compressed JSON
//! - `metadata`: `VersionMetadata`, bincode
//!
//! Both are keyed `<circuit_id bytes><0x00><version: u64 big-endian>`, so
//! a circuit's versions are contiguous and sorted by number.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use neurolab_core::CircuitState;

use super::versions::{
    CircuitVersion, StoreError, VersionMetadata, VersionStore, check_input, decode_snapshot,
    encode_snapshot,
};

const CF_VERSIONS: &str = "versions";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_VERSIONS, CF_METADATA];

const KEY_SEPARATOR: u8 = 0x00;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes
    pub block_cache_size: usize,
    /// Bloom filter bits per key
    pub bloom_filter_bits: i32,
    /// fsync on every write
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("neurolab_versions"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

pub struct RocksVersionStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes version-number allocation.
    write_lock: Mutex<()>,
}

impl RocksVersionStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(&db_opts, &config.path, cf_descriptors)?;
        log::info!("Opened version store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Values are already LZ4 frames.
            CF_VERSIONS => opts.set_compression_type(DBCompressionType::None),
            CF_METADATA => opts.set_compression_type(DBCompressionType::Lz4),
            _ => {}
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &'static str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }

    fn prefix(circuit_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(circuit_id.len() + 9);
        key.extend_from_slice(circuit_id.as_bytes());
        key.push(KEY_SEPARATOR);
        key
    }

    fn version_key(circuit_id: &str, version: u64) -> Vec<u8> {
        let mut key = Self::prefix(circuit_id);
        key.extend_from_slice(&version.to_be_bytes());
        key
    }

    /// Split a key back into `(circuit_id, version)`.
    fn parse_key(key: &[u8]) -> Option<(&str, u64)> {
        let split = key.len().checked_sub(9)?;
        if key[split] != KEY_SEPARATOR {
            return None;
        }
        let id = std::str::from_utf8(&key[..split]).ok()?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&key[split + 1..]);
        Some((id, u64::from_be_bytes(buf)))
    }

    fn latest_number(&self, circuit_id: &str) -> Result<Option<u64>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let last_key = Self::version_key(circuit_id, u64::MAX);
        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&last_key, Direction::Reverse));

        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Self::parse_key(&key)
                    .filter(|(id, _)| *id == circuit_id)
                    .map(|(_, version)| version))
            }
            None => Ok(None),
        }
    }

    fn load_metadata(&self, circuit_id: &str, version: u64) -> Result<VersionMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, Self::version_key(circuit_id, version))? {
            Some(bytes) => VersionMetadata::decode(&bytes),
            None => Err(StoreError::NotFound {
                circuit_id: circuit_id.to_string(),
                version,
            }),
        }
    }

    /// Keys of every version of `circuit_id` in `cf`, in order.
    fn keys_of(&self, cf: &rocksdb::ColumnFamily, circuit_id: &str) -> Result<Vec<Box<[u8]>>, StoreError> {
        let prefix = Self::prefix(circuit_id);
        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) || key.len() != prefix.len() + 8 {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

impl VersionStore for RocksVersionStore {
    fn save_version(
        &self,
        circuit_id: &str,
        title: &str,
        description: Option<&str>,
        state: &CircuitState,
    ) -> Result<VersionMetadata, StoreError> {
        check_input(circuit_id, state)?;
        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let json_len = state.to_json()?.len() as u64;
        let compressed = encode_snapshot(state)?;

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let version = self.latest_number(circuit_id)?.map_or(1, |v| v + 1);

        let mut meta = VersionMetadata::new(circuit_id, version, title, description, state);
        meta.snapshot_size = json_len;
        meta.compressed_size = compressed.len() as u64;

        // Snapshot and metadata land together or not at all.
        let key = Self::version_key(circuit_id, version);
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_versions, &key, &compressed);
        batch.put_cf(&cf_meta, &key, meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        log::debug!(
            "saved {circuit_id} v{version} ({} -> {} bytes)",
            meta.snapshot_size,
            meta.compressed_size
        );
        Ok(meta)
    }

    fn load_version(&self, circuit_id: &str, version: u64) -> Result<CircuitVersion, StoreError> {
        let cf = self.cf(CF_VERSIONS)?;
        let metadata = self.load_metadata(circuit_id, version)?;
        let bytes = self
            .db
            .get_cf(&cf, Self::version_key(circuit_id, version))?
            .ok_or_else(|| StoreError::NotFound {
                circuit_id: circuit_id.to_string(),
                version,
            })?;
        Ok(CircuitVersion {
            metadata,
            state: decode_snapshot(&bytes)?,
        })
    }

    fn list_versions(&self, circuit_id: &str) -> Result<Vec<VersionMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let prefix = Self::prefix(circuit_id);
        let mut versions = Vec::new();

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || key.len() != prefix.len() + 8 {
                break;
            }
            versions.push(VersionMetadata::decode(&value)?);
        }

        Ok(versions)
    }

    fn latest_version(&self, circuit_id: &str) -> Result<Option<CircuitVersion>, StoreError> {
        self.latest_number(circuit_id)?
            .map(|v| self.load_version(circuit_id, v))
            .transpose()
    }

    fn list_circuits(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = BTreeSet::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            match Self::parse_key(&key) {
                Some((id, _)) => {
                    ids.insert(id.to_string());
                }
                None => log::warn!("skipping malformed metadata key ({} bytes)", key.len()),
            }
        }
        Ok(ids.into_iter().collect())
    }

    fn delete_circuit(&self, circuit_id: &str) -> Result<usize, StoreError> {
        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let keys = self.keys_of(cf_meta, circuit_id)?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::default();
        for key in &keys {
            batch.delete_cf(&cf_versions, key);
            batch.delete_cf(&cf_meta, key);
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        log::info!("deleted {} versions of {circuit_id}", keys.len());
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurolab_core::{Connection, ConnectionType, Neuron, NeuronKind};

    fn open_temp() -> (tempfile::TempDir, RocksVersionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksVersionStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    fn circuit(n: usize, label: &str) -> CircuitState {
        let neurons: Vec<Neuron> = (0..n)
            .map(|i| Neuron::new(format!("n{i}"), NeuronKind::Interneuron, i as f64 * 60.0, 0.0))
            .collect();
        let connections: Vec<Connection> = neurons
            .windows(2)
            .map(|w| Connection::between(&w[0].id, &w[1].id, 0.5, ConnectionType::Excitatory))
            .collect();
        CircuitState::capture(&neurons, &connections, label)
    }

    #[test]
    fn test_key_layout() {
        let key = RocksVersionStore::version_key("lab", 258);
        assert_eq!(&key[..4], b"lab\0");
        assert_eq!(&key[4..], &258u64.to_be_bytes());
        assert_eq!(RocksVersionStore::parse_key(&key), Some(("lab", 258)));
        assert_eq!(RocksVersionStore::parse_key(b"short"), None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (_dir, store) = open_temp();
        let state = circuit(12, "twelve");

        let meta = store.save_version("c1", "Baseline", Some("first cut"), &state).unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.neuron_count, 12);
        assert_eq!(meta.connection_count, 11);

        let loaded = store.load_version("c1", 1).unwrap();
        assert_eq!(loaded.state, state);
        assert_eq!(loaded.metadata, meta);
    }

    #[test]
    fn test_prefix_isolation() {
        let (_dir, store) = open_temp();
        // "c1" is a byte prefix of "c10"; the separator keeps them apart.
        store.save_version("c1", "a", None, &circuit(1, "one")).unwrap();
        store.save_version("c10", "b", None, &circuit(2, "ten")).unwrap();
        store.save_version("c1", "c", None, &circuit(3, "one again")).unwrap();

        let versions: Vec<u64> = store.list_versions("c1").unwrap().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(store.list_versions("c10").unwrap().len(), 1);
        assert_eq!(store.latest_version("c1").unwrap().unwrap().state.label, "one again");
        assert_eq!(store.list_circuits().unwrap(), vec!["c1".to_string(), "c10".to_string()]);
    }

    #[test]
    fn test_not_found() {
        let (_dir, store) = open_temp();
        assert!(store.latest_version("none").unwrap().is_none());
        assert!(matches!(
            store.load_version("none", 3),
            Err(StoreError::NotFound { version: 3, .. })
        ));
    }

    #[test]
    fn test_delete_circuit() {
        let (_dir, store) = open_temp();
        for i in 0..3 {
            store.save_version("c1", "v", None, &circuit(i + 1, "x")).unwrap();
        }
        store.save_version("c2", "v", None, &circuit(1, "y")).unwrap();

        assert_eq!(store.delete_circuit("c1").unwrap(), 3);
        assert!(store.list_versions("c1").unwrap().is_empty());
        assert_eq!(store.list_versions("c2").unwrap().len(), 1);

        // Numbering restarts once a circuit is gone.
        let meta = store.save_version("c1", "v", None, &circuit(1, "z")).unwrap();
        assert_eq!(meta.version, 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = RocksVersionStore::open(StoreConfig::for_testing(&path)).unwrap();
            store.save_version("c1", "kept", None, &circuit(4, "four")).unwrap();
            store.sync().unwrap();
        }
        let store = RocksVersionStore::open(StoreConfig::for_testing(&path)).unwrap();
        let latest = store.latest_version("c1").unwrap().unwrap();
        assert_eq!(latest.metadata.title, "kept");
        assert_eq!(latest.state.neurons.len(), 4);
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert!(config.sync_writes);
        assert_eq!(config.bloom_filter_bits, 10);
    }
}
