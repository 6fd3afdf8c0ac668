//! # neurolab-collab: shared circuit history for NeuroLab
//!
//! Multi-user editing on top of `neurolab-core`: every client keeps its own
//! author-tagged history log and broadcasts each change, with the complete
//! resulting graph, to a per-room channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐                       ┌──────────────────────┐
//! │ CollaborativeHistory │                       │ CollaborativeHistory │
//! │ (client A)           │                       │ (client B)           │
//! └──────────┬───────────┘                       └──────────▲───────────┘
//!            │ publish                         handle_remote │
//!            ▼                                               │
//! ┌──────────────────────┐   circuit-history-{room}  ┌───────┴──────────┐
//! │ SyncClient           │ ─────────────────────────►│ SyncClient       │
//! └──────────────────────┘      SyncServer relay     └──────────────────┘
//!                            (BroadcastGroup per room)
//! ```
//!
//! There is no central ordering authority. Each client owns its log; a
//! near-simultaneous edit from a peer surfaces as a pending conflict for the
//! user to settle.
//!
//! ## Modules
//!
//! - [`session`]: the collaborative history state machine
//! - [`protocol`]: binary wire envelope (bincode-encoded `ChannelMessage`)
//! - [`channel`]: room channel names and the transport seam
//! - [`broadcast`]: per-room fan-out with backpressure
//! - [`client`] / [`server`]: WebSocket client and stateless relay
//! - [`storage`]: numbered circuit versions (memory or RocksDB)
//! - [`config`]: session and relay settings

pub mod broadcast;
pub mod channel;
pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager, RoomPublisher};
pub use channel::{CHANNEL_PREFIX, HistoryTransport, NullTransport, channel_name, room_of};
pub use client::{ClientPublisher, ConnectionState, SyncClient, SyncEvent};
pub use config::{CollabConfig, ConfigError, ServerConfig, SessionConfig};
pub use protocol::{
    ChannelMessage, GraphPayload, HistoryEvent, MessageType, NavigateDirection, NavigatePayload,
    PeerInfo, ProtocolError,
};
pub use server::{ServerStats, SyncServer};
pub use session::{
    Activity, ActivitySink, CollaborativeHistory, CollaborativeHistoryEntry, Identity,
    IgnoreReason, Notification, Origin, PendingConflict, Reconciled, RemoteOutcome, Resolution,
    SessionPhase, detect_conflict,
};
pub use storage::{
    CircuitVersion, MemoryVersionStore, RocksVersionStore, StoreConfig, StoreError,
    VersionMetadata, VersionStore,
};
