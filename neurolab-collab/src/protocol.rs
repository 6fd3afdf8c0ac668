//! Binary wire protocol for room-scoped history messages.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬────────────────────────┬──────────┐
//! │ msg_type │ peer_id   │ channel                │ payload  │
//! │ 1 byte   │ 16 bytes  │ "circuit-history-{id}" │ variable │
//! └──────────┴───────────┴────────────────────────┴──────────┘
//! ```
//!
//! History payloads carry the complete resulting graph, never a diff, so
//! a peer that missed earlier messages still renders the right state from
//! the next one it receives. They are the JSON form of [`HistoryEvent`];
//! every other payload is bincode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use neurolab_core::{CircuitState, Connection, Neuron};

use crate::session::CollaborativeHistoryEntry;

/// Message types for the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Join a room channel (payload: `PeerInfo`)
    Subscribe = 1,
    /// Server accepted the subscription
    Subscribed = 2,
    /// Server refused the subscription (payload: reason)
    Rejected = 3,
    /// Leave the room channel
    Unsubscribe = 4,
    /// A new history entry (payload: `HistoryEvent::Action`)
    HistoryAction = 5,
    /// Undo/redo/jump result (payload: `HistoryEvent::Navigate`)
    HistoryNavigate = 6,
    /// Peer joined notification
    PeerJoined = 7,
    /// Peer left notification
    PeerLeft = 8,
    /// Heartbeat ping
    Ping = 9,
    /// Heartbeat pong
    Pong = 10,
}

/// Peer identity. `user_id`/`name` come from the identity provider and
/// are opaque; `peer_id` identifies one connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub user_id: String,
    pub name: String,
}

impl PeerInfo {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), user_id, name)
    }

    /// Create with explicit peer_id (for testing)
    pub fn with_id(peer_id: Uuid, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            user_id: user_id.into(),
            name: name.into(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// History payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigateDirection {
    Undo,
    Redo,
}

impl std::fmt::Display for NavigateDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavigateDirection::Undo => f.write_str("undo"),
            NavigateDirection::Redo => f.write_str("redo"),
        }
    }
}

/// Graph body of a navigation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPayload {
    pub neurons: Vec<Neuron>,
    pub connections: Vec<Connection>,
}

impl From<&CircuitState> for GraphPayload {
    fn from(state: &CircuitState) -> Self {
        Self {
            neurons: state.neurons.clone(),
            connections: state.connections.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatePayload {
    pub user_id: String,
    pub user_name: String,
    pub direction: NavigateDirection,
    pub target_index: usize,
    pub state: GraphPayload,
}

/// What travels on a room channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryEvent {
    #[serde(rename = "history_action")]
    Action(CollaborativeHistoryEntry),
    #[serde(rename = "history_navigate")]
    Navigate(NavigatePayload),
}

impl HistoryEvent {
    pub fn author_id(&self) -> &str {
        match self {
            HistoryEvent::Action(entry) => &entry.user_id,
            HistoryEvent::Navigate(nav) => &nav.user_id,
        }
    }

    pub fn author_name(&self) -> &str {
        match self {
            HistoryEvent::Action(entry) => &entry.user_name,
            HistoryEvent::Navigate(nav) => &nav.user_name,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            HistoryEvent::Action(_) => MessageType::HistoryAction,
            HistoryEvent::Navigate(_) => MessageType::HistoryNavigate,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Envelope
// ───────────────────────────────────────────────────────────────────

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub channel: String,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl ChannelMessage {
    fn bare(msg_type: MessageType, peer_id: Uuid, channel: impl Into<String>) -> Self {
        Self {
            msg_type,
            peer_id,
            channel: channel.into(),
            payload: Vec::new(),
        }
    }

    /// Create a subscription request.
    pub fn subscribe(peer: &PeerInfo, channel: impl Into<String>) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: encode_payload(peer)?,
            ..Self::bare(MessageType::Subscribe, peer.peer_id, channel)
        })
    }

    pub fn subscribed(channel: impl Into<String>) -> Self {
        Self::bare(MessageType::Subscribed, Uuid::nil(), channel)
    }

    pub fn rejected(channel: impl Into<String>, reason: &str) -> Self {
        Self {
            payload: reason.as_bytes().to_vec(),
            ..Self::bare(MessageType::Rejected, Uuid::nil(), channel)
        }
    }

    pub fn unsubscribe(peer_id: Uuid, channel: impl Into<String>) -> Self {
        Self::bare(MessageType::Unsubscribe, peer_id, channel)
    }

    /// Wrap a history event for the room channel.
    pub fn history(peer_id: Uuid, channel: impl Into<String>, event: &HistoryEvent) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: event.to_json()?.into_bytes(),
            ..Self::bare(event.message_type(), peer_id, channel)
        })
    }

    pub fn peer_joined(channel: impl Into<String>, info: &PeerInfo) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: encode_payload(info)?,
            ..Self::bare(MessageType::PeerJoined, info.peer_id, channel)
        })
    }

    pub fn peer_left(peer_id: Uuid, channel: impl Into<String>) -> Self {
        Self::bare(MessageType::PeerLeft, peer_id, channel)
    }

    pub fn ping(peer_id: Uuid) -> Self {
        Self::bare(MessageType::Ping, peer_id, String::new())
    }

    pub fn pong(peer_id: Uuid) -> Self {
        Self::bare(MessageType::Pong, peer_id, String::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Read the sender's `peer_id` from an encoded message without
    /// decoding the channel or payload.
    pub fn peek_peer_id(bytes: &[u8]) -> Result<Uuid, ProtocolError> {
        let (header, _): (Header, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(header.peer_id)
    }

    pub fn is_history(&self) -> bool {
        matches!(
            self.msg_type,
            MessageType::HistoryAction | MessageType::HistoryNavigate
        )
    }

    /// Parse a history payload.
    pub fn history_event(&self) -> Result<HistoryEvent, ProtocolError> {
        if !self.is_history() {
            return Err(ProtocolError::InvalidMessageType(self.msg_type));
        }
        let event: HistoryEvent = serde_json::from_slice(&self.payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if event.message_type() != self.msg_type {
            return Err(ProtocolError::InvalidMessageType(self.msg_type));
        }
        Ok(event)
    }

    /// Parse peer info payload.
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        match self.msg_type {
            MessageType::Subscribe | MessageType::PeerJoined => decode_payload(&self.payload),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }

    pub fn rejection_reason(&self) -> Option<String> {
        (self.msg_type == MessageType::Rejected)
            .then(|| String::from_utf8_lossy(&self.payload).into_owned())
    }
}

/// Leading fields of an encoded [`ChannelMessage`].
#[derive(Deserialize)]
struct Header {
    #[allow(dead_code)]
    msg_type: MessageType,
    peer_id: Uuid,
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid message type: {0:?}")]
    InvalidMessageType(MessageType),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Client already connected")]
    AlreadyConnected,
    #[error("Subscription rejected: {0}")]
    Rejected(String),
}
