//! Per-room fan-out over tokio broadcast channels.
//!
//! Every peer subscribed to a room channel holds an independent receiver
//! buffering up to `capacity` messages. A peer that falls further behind
//! loses the oldest messages; since history messages carry full graphs it
//! converges again on the next one it reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::channel::HistoryTransport;
use crate::protocol::{ChannelMessage, HistoryEvent, PeerInfo, ProtocolError};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Counters updated without taking the peer lock.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single room channel.
///
/// Messages reach every receiver including the sender's own; filtering by
/// `peer_id` is the receiver's job.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    peers: Arc<RwLock<HashMap<Uuid, PeerInfo>>>,
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` is how many messages each receiver buffers before it
    /// starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Register a peer and hand back its receiver.
    pub async fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.peer_id, info);
        self.sender.subscribe()
    }

    /// Register a peer unless the group already holds `max_peers`. The
    /// count and the insert happen under one write lock.
    pub async fn try_add_peer(
        &self,
        info: PeerInfo,
        max_peers: usize,
    ) -> Option<broadcast::Receiver<Arc<Vec<u8>>>> {
        let mut peers = self.peers.write().await;
        if peers.len() >= max_peers && !peers.contains_key(&info.peer_id) {
            return None;
        }
        peers.insert(info.peer_id, info);
        Some(self.sender.subscribe())
    }

    pub async fn remove_peer(&self, peer_id: &Uuid) -> Option<PeerInfo> {
        let mut peers = self.peers.write().await;
        peers.remove(peer_id)
    }

    /// Encode and fan out. Returns the number of receivers reached.
    pub fn broadcast(&self, msg: &ChannelMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Fan out already-encoded bytes.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for messages a lagging receiver skipped.
    pub fn record_dropped(&self, count: u64) {
        self.atomic_stats
            .messages_dropped
            .fetch_add(count, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        let peers = self.peers.read().await;
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: peers.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw receiver that is not tracked as a peer.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

/// Publishes a session's history events straight into a group, tagged
/// with the publishing peer's id.
#[derive(Clone)]
pub struct RoomPublisher {
    group: Arc<BroadcastGroup>,
    peer_id: Uuid,
}

impl RoomPublisher {
    pub fn new(group: Arc<BroadcastGroup>, peer_id: Uuid) -> Self {
        Self { group, peer_id }
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }
}

impl HistoryTransport for RoomPublisher {
    fn publish(&self, channel: &str, event: &HistoryEvent) {
        match ChannelMessage::history(self.peer_id, channel, event).and_then(|m| m.encode()) {
            Ok(bytes) => {
                let reached = self.group.broadcast_raw(Arc::new(bytes));
                log::trace!("{channel}: {:?} reached {reached} receivers", event.message_type());
            }
            Err(e) => log::error!("{channel}: failed to encode history event: {e}"),
        }
    }
}

/// Maps room channel names to broadcast groups.
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<String, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    pub async fn get_or_create(&self, channel: &str) -> Arc<BroadcastGroup> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(channel) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Another task may have created it between the two locks.
        if let Some(room) = rooms.get(channel) {
            return room.clone();
        }

        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(channel.to_string(), room.clone());
        log::debug!("opened room {channel}");
        room
    }

    pub async fn get(&self, channel: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(channel).cloned()
    }

    /// Drop the room if nobody is left in it.
    pub async fn remove_if_empty(&self, channel: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(channel) {
            if room.peer_count().await == 0 {
                rooms.remove(channel);
                log::debug!("closed empty room {channel}");
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_channels(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
