use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::OutboundEvent;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<OutboundEvent>;
/// Receiving half of a connection's outbound queue, drained by the transport.
pub type Inbox = mpsc::UnboundedReceiver<OutboundEvent>;

/// Opaque identifier assigned to a connection when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug)]
struct Connection {
    outbox: Outbox,
    connected_at: DateTime<Utc>,
}

/// Live connections and how to reach them.
///
/// Sends never fail loudly: a closed outbox means the transport is going away
/// and its disconnect will arrive shortly, so the event is dropped.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already registered; the existing outbox is kept.
    pub fn register(&mut self, id: ConnectionId, outbox: Outbox) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        self.connections.insert(
            id,
            Connection {
                outbox,
                connected_at: Utc::now(),
            },
        );
        true
    }

    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some(connection) => {
                tracing::debug!(
                    connection = %id,
                    connected_for = %(Utc::now() - connection.connected_at),
                    "Connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Unicast. Returns whether the event was queued.
    pub fn send_to(&self, id: &ConnectionId, event: OutboundEvent) -> bool {
        match self.connections.get(id) {
            Some(connection) => Self::deliver(id, connection, event),
            None => false,
        }
    }

    /// Sends to every connection, optionally skipping one. Returns the number queued.
    pub fn broadcast(&self, event: &OutboundEvent, except: Option<&ConnectionId>) -> usize {
        self.connections
            .iter()
            .filter(|(id, _)| Some(*id) != except)
            .filter(|(id, connection)| Self::deliver(id, connection, event.clone()))
            .count()
    }

    /// Sends to each listed connection that is still registered.
    pub fn send_to_group<'a, I>(&self, members: I, event: &OutboundEvent) -> usize
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        members
            .into_iter()
            .filter_map(|id| self.connections.get(id).map(|c| (id, c)))
            .filter(|(id, connection)| Self::deliver(id, connection, event.clone()))
            .count()
    }

    fn deliver(id: &ConnectionId, connection: &Connection, event: OutboundEvent) -> bool {
        match connection.outbox.send(event) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(connection = %id, "outbox closed, dropping {}", err.0.name());
                false
            }
        }
    }
}
