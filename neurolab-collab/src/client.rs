//! WebSocket client for one room channel.
//!
//! Provides:
//! - Subscription lifecycle (`Disconnected → Subscribing → Live`)
//! - A [`ClientPublisher`] that a session uses as its transport
//! - A stream of [`SyncEvent`]s to feed back into the session
//!
//! Publishing never waits: outgoing frames go through a bounded queue and
//! are dropped with a warning when it is full or the socket is gone.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::channel::{HistoryTransport, channel_name};
use crate::protocol::{ChannelMessage, HistoryEvent, MessageType, PeerInfo, ProtocolError};
use crate::session::{CollaborativeHistory, RemoteOutcome, SessionPhase};

const QUEUE_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Subscribing,
    Live,
}

impl From<ConnectionState> for SessionPhase {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => SessionPhase::Disconnected,
            ConnectionState::Subscribing => SessionPhase::Subscribing,
            ConnectionState::Live => SessionPhase::Live,
        }
    }
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The server acknowledged the subscription
    Live,
    /// Connection lost or closed
    Disconnected,
    /// The server refused the subscription
    Rejected(String),
    /// A history message from another peer on the channel
    History { peer_id: Uuid, event: HistoryEvent },
    PeerJoined(PeerInfo),
    PeerLeft(Uuid),
    Pong,
}

impl SyncEvent {
    /// Drive a session from this event. Returns the session's verdict
    /// for history messages.
    pub fn apply_to<T: HistoryTransport>(self, session: &mut CollaborativeHistory<T>) -> Option<RemoteOutcome> {
        match self {
            SyncEvent::Live => {
                session.mark_live();
                None
            }
            SyncEvent::Disconnected | SyncEvent::Rejected(_) => {
                session.disconnect();
                None
            }
            SyncEvent::History { event, .. } => Some(session.handle_remote(event)),
            SyncEvent::PeerJoined(_) | SyncEvent::PeerLeft(_) | SyncEvent::Pong => None,
        }
    }
}

/// Outbound half handed to a session.
#[derive(Clone)]
pub struct ClientPublisher {
    peer_id: Uuid,
    tx: mpsc::Sender<Vec<u8>>,
}

impl HistoryTransport for ClientPublisher {
    fn publish(&self, channel: &str, event: &HistoryEvent) {
        let bytes = match ChannelMessage::history(self.peer_id, channel, event).and_then(|m| m.encode()) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("{channel}: failed to encode history event: {e}");
                return;
            }
        };
        if let Err(e) = self.tx.try_send(bytes) {
            log::warn!("{channel}: dropped outgoing {:?}: {e}", event.message_type());
        }
    }
}

/// The sync client.
pub struct SyncClient {
    peer_info: PeerInfo,
    room_id: String,
    channel: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: mpsc::Sender<Vec<u8>>,
    /// Consumed by the writer task on `connect`.
    outgoing_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(peer_info: PeerInfo, room_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        let room_id = room_id.into();
        let (event_tx, event_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            peer_info,
            channel: channel_name(&room_id),
            room_id,
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Transport for a session bound to this client.
    pub fn publisher(&self) -> ClientPublisher {
        ClientPublisher {
            peer_id: self.peer_info.peer_id,
            tx: self.outgoing_tx.clone(),
        }
    }

    /// Open the socket and request the room channel.
    ///
    /// Returns once the subscription is sent; [`SyncEvent::Live`] follows
    /// when the server accepts it.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        let mut out_rx = self
            .outgoing_rx
            .lock()
            .await
            .take()
            .ok_or(ProtocolError::AlreadyConnected)?;

        *self.state.write().await = ConnectionState::Subscribing;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                *self.outgoing_rx.lock().await = Some(out_rx);
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // The subscription must be the first frame on the wire.
        let subscribe = ChannelMessage::subscribe(&self.peer_info, self.channel.clone())?.encode()?;
        if ws_writer.send(Message::Binary(subscribe.into())).await.is_err() {
            *self.state.write().await = ConnectionState::Disconnected;
            *self.outgoing_rx.lock().await = Some(out_rx);
            return Err(ProtocolError::ConnectionClosed);
        }
        log::info!("{} subscribing to {}", self.peer_info.name, self.channel);

        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let peer_id = self.peer_info.peer_id;
        let channel = self.channel.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let msg = match ChannelMessage::decode(&data) {
                            Ok(msg) => msg,
                            Err(e) => {
                                log::warn!("{channel}: undecodable frame: {e}");
                                continue;
                            }
                        };
                        if msg.peer_id == peer_id {
                            continue;
                        }

                        let event = match msg.msg_type {
                            MessageType::Subscribed => {
                                *state.write().await = ConnectionState::Live;
                                log::info!("{channel}: live");
                                Some(SyncEvent::Live)
                            }
                            MessageType::Rejected => {
                                let reason = msg.rejection_reason().unwrap_or_default();
                                log::warn!("{channel}: subscription rejected: {reason}");
                                *state.write().await = ConnectionState::Disconnected;
                                let _ = event_tx.send(SyncEvent::Rejected(reason)).await;
                                return;
                            }
                            MessageType::HistoryAction | MessageType::HistoryNavigate => {
                                match msg.history_event() {
                                    Ok(event) => Some(SyncEvent::History { peer_id: msg.peer_id, event }),
                                    Err(e) => {
                                        log::warn!("{channel}: bad history payload from {}: {e}", msg.peer_id);
                                        None
                                    }
                                }
                            }
                            MessageType::PeerJoined => msg.peer_info().ok().map(SyncEvent::PeerJoined),
                            MessageType::PeerLeft => Some(SyncEvent::PeerLeft(msg.peer_id)),
                            MessageType::Pong => Some(SyncEvent::Pong),
                            other => {
                                log::debug!("{channel}: unexpected {other:?}");
                                None
                            }
                        };

                        if let Some(evt) = event {
                            let _ = event_tx.send(evt).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            log::info!("{channel}: disconnected");
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Leave the room; the server closes the socket.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        let msg = ChannelMessage::unsubscribe(self.peer_info.peer_id, self.channel.clone());
        self.send(msg.encode()?).await
    }

    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send(ChannelMessage::ping(self.peer_info.peer_id).encode()?).await
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<(), ProtocolError> {
        if *self.state.read().await == ConnectionState::Disconnected {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outgoing_tx
            .send(bytes)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer_info
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
