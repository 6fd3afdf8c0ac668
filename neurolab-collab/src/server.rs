//! Stateless WebSocket relay for room channels.
//!
//! ```text
//! Client A ──┐                                   ┌──► Client B
//!             ├── Subscribe(circuit-history-X) ──┤
//! Client C ──┘        BroadcastGroup (X)         └──► Client C
//! ```
//!
//! The relay stores nothing and arbitrates nothing. A history frame from a
//! subscribed peer is forwarded byte-for-byte to every other peer on the
//! same channel; a peer that joins later gets no backfill.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, RoomManager};
use crate::channel::room_of;
pub use crate::config::ServerConfig;
use crate::protocol::{ChannelMessage, MessageType, PeerInfo};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub relayed_messages: u64,
    pub rejected_subscriptions: u64,
    pub active_rooms: usize,
}

/// Subscription held by one connection.
struct Membership {
    peer: PeerInfo,
    channel: String,
    room: Arc<BroadcastGroup>,
    rx: broadcast::Receiver<Arc<Vec<u8>>>,
}

pub struct SyncServer {
    config: ServerConfig,
    room_manager: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let room_manager = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            room_manager,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind `config.bind_addr` and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let stats = self.stats.clone();
            let config = self.config.clone();
            let room_manager = self.room_manager.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, room_manager, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        room_manager: Arc<RoomManager>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut membership: Option<Membership> = None;
        let mut heartbeat: Option<Interval> = (config.heartbeat_interval_secs > 0).then(|| {
            let period = Duration::from_secs(config.heartbeat_interval_secs);
            interval_at(Instant::now() + period, period)
        });

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let msg = match ChannelMessage::decode(&data) {
                                    Ok(msg) => msg,
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        continue;
                                    }
                                };
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += data.len() as u64;
                                }

                                match msg.msg_type {
                                    MessageType::Subscribe => {
                                        if membership.is_some() {
                                            log::warn!("{addr} sent a second Subscribe; ignored");
                                            continue;
                                        }
                                        match Self::subscribe(&msg, &room_manager, &config).await {
                                            Ok(joined) => {
                                                let ack = ChannelMessage::subscribed(joined.channel.clone());
                                                ws_sender.send(Message::Binary(ack.encode()?.into())).await?;
                                                joined.room.broadcast(&ChannelMessage::peer_joined(
                                                    joined.channel.clone(),
                                                    &joined.peer,
                                                )?)?;
                                                log::info!(
                                                    "Peer {} ({}) joined {}",
                                                    joined.peer.name,
                                                    joined.peer.peer_id,
                                                    joined.channel
                                                );
                                                stats.write().await.active_rooms = room_manager.room_count().await;
                                                membership = Some(joined);
                                            }
                                            Err(reason) => {
                                                log::warn!("Rejected subscription to {} from {addr}: {reason}", msg.channel);
                                                stats.write().await.rejected_subscriptions += 1;
                                                let reject = ChannelMessage::rejected(msg.channel.clone(), &reason);
                                                ws_sender.send(Message::Binary(reject.encode()?.into())).await?;
                                                break;
                                            }
                                        }
                                    }

                                    MessageType::HistoryAction | MessageType::HistoryNavigate => {
                                        match &membership {
                                            Some(m) if m.channel == msg.channel && m.peer.peer_id == msg.peer_id => {
                                                let reached = m.room.broadcast_raw(Arc::new(data.to_vec()));
                                                stats.write().await.relayed_messages += 1;
                                                log::debug!(
                                                    "{}: relayed {:?} from {} to {} receivers",
                                                    m.channel,
                                                    msg.msg_type,
                                                    m.peer.name,
                                                    reached.saturating_sub(1)
                                                );
                                            }
                                            _ => log::warn!(
                                                "Dropped {:?} for {} from unsubscribed {addr}",
                                                msg.msg_type,
                                                msg.channel
                                            ),
                                        }
                                    }

                                    MessageType::Unsubscribe => break,

                                    MessageType::Ping => {
                                        let pong = ChannelMessage::pong(Uuid::nil());
                                        ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
                                    }

                                    other => log::debug!("Unhandled message type from {addr}: {other:?}"),
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    msg = async {
                        match membership.as_mut() {
                            Some(m) => m.rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        match msg {
                            Ok(data) => {
                                let own = membership.as_ref().is_some_and(|m| {
                                    ChannelMessage::peek_peer_id(&data).is_ok_and(|id| id == m.peer.peer_id)
                                });
                                if !own {
                                    ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                if let Some(m) = &membership {
                                    log::warn!("{}: peer {} lagged by {n} messages", m.channel, m.peer.name);
                                    m.room.record_dropped(n);
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }

                    _ = async {
                        match heartbeat.as_mut() {
                            Some(interval) => {
                                interval.tick().await;
                            }
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        ws_sender.send(Message::Ping(Vec::new().into())).await?;
                        log::trace!("heartbeat ping to {addr}");
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        if let Some(m) = membership {
            m.room.remove_peer(&m.peer.peer_id).await;
            let _ = m.room.broadcast(&ChannelMessage::peer_left(m.peer.peer_id, m.channel.clone()));
            log::info!("Peer {} left {}", m.peer.name, m.channel);
            room_manager.remove_if_empty(&m.channel).await;
        }
        let _ = ws_sender.close().await;

        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = room_manager.room_count().await;
        }

        result
    }

    /// Validate a Subscribe frame and join its room.
    async fn subscribe(
        msg: &ChannelMessage,
        room_manager: &RoomManager,
        config: &ServerConfig,
    ) -> Result<Membership, String> {
        if room_of(&msg.channel).is_none() {
            return Err(format!("invalid channel \"{}\"", msg.channel));
        }
        let peer = msg.peer_info().map_err(|e| e.to_string())?;
        if peer.peer_id != msg.peer_id {
            return Err("peer id mismatch".to_string());
        }

        let room = room_manager.get_or_create(&msg.channel).await;
        let Some(rx) = room.try_add_peer(peer.clone(), config.max_peers_per_room).await else {
            room_manager.remove_if_empty(&msg.channel).await;
            return Err("room full".to_string());
        };
        Ok(Membership {
            peer,
            channel: msg.channel.clone(),
            room,
            rx,
        })
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.room_manager
    }
}
