use std::collections::{HashMap, HashSet};

use crate::{
    connection::ConnectionId,
    error::{Error, RelayErrorKind},
};

/// Viewer membership per stream.
///
/// Rooms are only created and destroyed by [`crate::stream::StreamDirectory`],
/// so a room exists exactly when its stream is live.
#[derive(Debug, Default)]
pub struct RoomTracker {
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty room. Any leftover membership under the same id is discarded.
    pub(crate) fn create_room(&mut self, stream_id: &str) {
        if let Some(stale) = self.rooms.insert(stream_id.to_string(), HashSet::new()) {
            tracing::warn!(
                stream = stream_id,
                members = stale.len(),
                "Replaced a room that had no stream"
            );
        }
    }

    /// Removes the room and returns its former members. No-op if absent.
    pub(crate) fn destroy_room(&mut self, stream_id: &str) -> HashSet<ConnectionId> {
        self.rooms.remove(stream_id).unwrap_or_default()
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.rooms.contains_key(stream_id)
    }

    /// Adds a viewer and returns the new count. Joining twice is not an error.
    pub fn join(&mut self, stream_id: &str, connection: ConnectionId) -> Result<usize, Error> {
        let members = self.rooms.get_mut(stream_id).ok_or_else(|| {
            Error::new_relay(
                format!("Room for {} is not found", stream_id),
                RelayErrorKind::NoSuchStream,
            )
        })?;
        members.insert(connection);
        Ok(members.len())
    }

    /// Removes a viewer and returns the new count, 0 when the room does not exist.
    pub fn leave(&mut self, stream_id: &str, connection: &ConnectionId) -> usize {
        match self.rooms.get_mut(stream_id) {
            Some(members) => {
                members.remove(connection);
                members.len()
            }
            None => 0,
        }
    }

    pub fn count_of(&self, stream_id: &str) -> usize {
        self.rooms.get(stream_id).map(|m| m.len()).unwrap_or(0)
    }

    #[cfg(test)]
    fn is_member(&self, stream_id: &str, connection: &ConnectionId) -> bool {
        self.rooms
            .get(stream_id)
            .map(|m| m.contains(connection))
            .unwrap_or(false)
    }

    pub fn members(&self, stream_id: &str) -> impl Iterator<Item = &ConnectionId> {
        self.rooms.get(stream_id).into_iter().flatten()
    }

    /// Stream ids of every room the connection is in, sorted.
    pub fn rooms_of(&self, connection: &ConnectionId) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(connection))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drops the connection from every room and reports the rooms that changed,
    /// sorted by stream id, with their new counts.
    pub fn remove_connection_everywhere(
        &mut self,
        connection: &ConnectionId,
    ) -> Vec<(String, usize)> {
        let mut changed: Vec<(String, usize)> = self
            .rooms
            .iter_mut()
            .filter_map(|(id, members)| {
                members
                    .remove(connection)
                    .then(|| (id.clone(), members.len()))
            })
            .collect();
        changed.sort();
        changed
    }
}
