//! Transport events and the FIFO queue they are consumed from.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;

use crate::connection::ConnectionId;

/// One delivery-facing occurrence produced by client/server polling.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new peer connected.
    Connect(ConnectionId),
    /// A peer closed its end of the connection.
    Disconnect(ConnectionId),
    /// A complete packet arrived from a peer.
    Receive(ConnectionId, Bytes),
}

impl TransportEvent {
    /// The identity of the connection this event concerns.
    pub fn connection(&self) -> &ConnectionId {
        match self {
            TransportEvent::Connect(id)
            | TransportEvent::Disconnect(id)
            | TransportEvent::Receive(id, _) => id,
        }
    }
}

/// Strict FIFO queue of transport events.
///
/// The polling entry points push, the owning application pops in the order
/// produced. Purely a decoupling buffer between I/O draining and application
/// dispatch: no deduplication, no priority, no expiry.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<TransportEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: TransportEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    /// Pop the oldest pending event, if any.
    pub fn pop(&self) -> Option<TransportEvent> {
        self.events.lock().unwrap().pop_front()
    }

    /// Number of events waiting to be consumed.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
