//! Room channels and the outbound transport seam.
//!
//! A session only ever publishes; it never waits for delivery. Anything
//! that can push an event towards the room's peers implements
//! [`HistoryTransport`]: the WebSocket client's publisher, an in-process
//! [`BroadcastGroup`](crate::broadcast::BroadcastGroup), or a test double.

use std::sync::Arc;

use crate::protocol::HistoryEvent;

pub const CHANNEL_PREFIX: &str = "circuit-history-";

/// Channel name for an editing room.
pub fn channel_name(room_id: &str) -> String {
    format!("{CHANNEL_PREFIX}{room_id}")
}

/// Inverse of [`channel_name`].
pub fn room_of(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(CHANNEL_PREFIX)
        .filter(|room| !room.is_empty())
}

/// Fire-and-forget publish of a history event to a room channel.
///
/// Implementations must not block and must not report delivery failure
/// back to the caller; at most they log it.
pub trait HistoryTransport {
    fn publish(&self, channel: &str, event: &HistoryEvent);
}

impl<T: HistoryTransport + ?Sized> HistoryTransport for &T {
    fn publish(&self, channel: &str, event: &HistoryEvent) {
        (**self).publish(channel, event)
    }
}

impl<T: HistoryTransport + ?Sized> HistoryTransport for Arc<T> {
    fn publish(&self, channel: &str, event: &HistoryEvent) {
        (**self).publish(channel, event)
    }
}

impl<T: HistoryTransport + ?Sized> HistoryTransport for Box<T> {
    fn publish(&self, channel: &str, event: &HistoryEvent) {
        (**self).publish(channel, event)
    }
}

/// Transport for a session that is not attached to any room.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl HistoryTransport for NullTransport {
    fn publish(&self, channel: &str, event: &HistoryEvent) {
        log::trace!("null transport: dropped {:?} on {channel}", event.message_type());
    }
}
