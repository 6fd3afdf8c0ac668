//! Durable numbered versions of circuits.
//!
//! ```text
//! ┌──────────────┐  save_version   ┌────────────────────────────────────┐
//! │ CircuitState │ ──────────────► │ VersionStore                       │
//! │ (snapshot)   │ ◄────────────── │  ├─ MemoryVersionStore             │
//! └──────────────┘  load_version   │  └─ RocksVersionStore              │
//!                                  │      CF "versions" - LZ4(JSON)     │
//!                                  │      CF "metadata" - bincode       │
//!                                  └────────────────────────────────────┘
//! ```
//!
//! A stored version is the snapshot shape as-is, plus a title and an
//! optional description. Restoring one goes through the history like any
//! other edit.

pub mod rocks;
pub mod versions;

pub use rocks::{RocksVersionStore, StoreConfig};
pub use versions::{
    CircuitVersion, MemoryVersionStore, StoreError, VersionMetadata, VersionStore,
    decode_snapshot, encode_snapshot,
};
