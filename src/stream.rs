use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    connection::ConnectionId,
    error::{Error, RelayErrorKind},
    room::RoomTracker,
};

/// A live stream, owned by the connection that started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: String,
    pub title: String,
    pub display_name: String,
    pub owner: ConnectionId,
    pub started_at: DateTime<Utc>,
}

impl Stream {
    pub fn summary(&self, viewers: usize) -> StreamSummary {
        StreamSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            streamer: self.display_name.clone(),
            viewers,
            is_live: true,
            started_at: self.started_at,
            owner_connection: self.owner,
        }
    }
}

/// What clients see of a stream in `new-stream` and `streams-list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub id: String,
    pub title: String,
    pub streamer: String,
    pub viewers: usize,
    pub is_live: bool,
    pub started_at: DateTime<Utc>,
    pub owner_connection: ConnectionId,
}

/// The set of live streams, keyed by stream id.
///
/// Every mutation that creates or removes a stream takes the [`RoomTracker`]
/// as well, so a stream and its room always appear and disappear together.
#[derive(Debug, Default)]
pub struct StreamDirectory {
    streams: BTreeMap<String, Stream>,
}

impl StreamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new stream with an empty room.
    ///
    /// Fails with `DuplicateStream` if the id is already live or if the owner
    /// already has a live stream. An existing record is never overwritten.
    pub fn start_stream(
        &mut self,
        rooms: &mut RoomTracker,
        owner: ConnectionId,
        stream_id: String,
        title: String,
        display_name: String,
    ) -> Result<&Stream, Error> {
        if self.streams.contains_key(&stream_id) {
            return Err(Error::new_relay(
                format!("Stream {} is already live", stream_id),
                RelayErrorKind::DuplicateStream,
            ));
        }
        if let Some(existing) = self.get_by_owner(&owner) {
            return Err(Error::new_relay(
                format!("Connection {} already streams {}", owner, existing.id),
                RelayErrorKind::DuplicateStream,
            ));
        }

        rooms.create_room(&stream_id);
        let stream = Stream {
            id: stream_id.clone(),
            title,
            display_name,
            owner,
            started_at: Utc::now(),
        };
        Ok(&*self.streams.entry(stream_id).or_insert(stream))
    }

    /// Removes the stream and its room. Returns the removed stream with the
    /// members its room had.
    pub fn stop_stream(
        &mut self,
        rooms: &mut RoomTracker,
        caller: &ConnectionId,
        stream_id: &str,
    ) -> Result<(Stream, HashSet<ConnectionId>), Error> {
        let stream = self.streams.get(stream_id).ok_or_else(|| {
            Error::new_relay(
                format!("Stream {} is not found", stream_id),
                RelayErrorKind::NoSuchStream,
            )
        })?;
        if &stream.owner != caller {
            return Err(Error::new_relay(
                format!("Connection {} does not own stream {}", caller, stream_id),
                RelayErrorKind::NotOwner,
            ));
        }

        self.remove(rooms, stream_id).ok_or_else(|| {
            Error::new_relay(
                format!("Stream {} is not found", stream_id),
                RelayErrorKind::NoSuchStream,
            )
        })
    }

    #[cfg(test)]
    fn get(&self, stream_id: &str) -> Option<&Stream> {
        self.streams.get(stream_id)
    }

    pub fn get_by_owner(&self, owner: &ConnectionId) -> Option<&Stream> {
        self.streams.values().find(|s| &s.owner == owner)
    }

    /// Disconnect path of `stop_stream`. Idempotent.
    pub fn remove_by_owner(
        &mut self,
        rooms: &mut RoomTracker,
        owner: &ConnectionId,
    ) -> Option<(Stream, HashSet<ConnectionId>)> {
        let stream_id = self.get_by_owner(owner)?.id.clone();
        self.remove(rooms, &stream_id)
    }

    /// Live streams in id order, with viewer counts read from `rooms` as the
    /// iterator advances. Clone the iterator to walk it again.
    pub fn list_streams<'a>(
        &'a self,
        rooms: &'a RoomTracker,
    ) -> impl Iterator<Item = StreamSummary> + Clone + 'a {
        self.streams
            .values()
            .map(move |stream| stream.summary(rooms.count_of(&stream.id)))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.streams.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    fn remove(
        &mut self,
        rooms: &mut RoomTracker,
        stream_id: &str,
    ) -> Option<(Stream, HashSet<ConnectionId>)> {
        let stream = self.streams.remove(stream_id)?;
        let members = rooms.destroy_room(stream_id);
        Some((stream, members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(
        directory: &mut StreamDirectory,
        rooms: &mut RoomTracker,
        owner: ConnectionId,
        id: &str,
    ) -> Result<Stream, Error> {
        directory
            .start_stream(rooms, owner, id.to_string(), "Demo".to_string(), "Alice".to_string())
            .cloned()
    }

    #[test]
    fn start_creates_stream_and_room_together() {
        let mut directory = StreamDirectory::new();
        let mut rooms = RoomTracker::new();
        let owner = ConnectionId::new();

        let stream = start(&mut directory, &mut rooms, owner, "k1").unwrap();

        assert_eq!(stream.owner, owner);
        assert_eq!(stream.title, "Demo");
        assert!(rooms.contains("k1"));
        assert_eq!(rooms.count_of("k1"), 0);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn duplicate_start_leaves_original_untouched() {
        let mut directory = StreamDirectory::new();
        let mut rooms = RoomTracker::new();
        let owner = ConnectionId::new();
        let original = start(&mut directory, &mut rooms, owner, "k1").unwrap();
        let viewer = ConnectionId::new();
        rooms.join("k1", viewer).unwrap();

        let err = directory
            .start_stream(
                &mut rooms,
                ConnectionId::new(),
                "k1".to_string(),
                "Other".to_string(),
                "Mallory".to_string(),
            )
            .unwrap_err();

        assert_eq!(err.relay_kind(), Some(RelayErrorKind::DuplicateStream));
        assert_eq!(directory.get("k1"), Some(&original));
        assert_eq!(rooms.count_of("k1"), 1);
    }

    #[test]
    fn owner_may_hold_only_one_stream() {
        let mut directory = StreamDirectory::new();
        let mut rooms = RoomTracker::new();
        let owner = ConnectionId::new();
        start(&mut directory, &mut rooms, owner, "k1").unwrap();

        let err = start(&mut directory, &mut rooms, owner, "k2").unwrap_err();

        assert_eq!(err.relay_kind(), Some(RelayErrorKind::DuplicateStream));
        assert!(!rooms.contains("k2"));
        assert!(directory.get("k2").is_none());
    }

    #[test]
    fn stop_checks_presence_and_ownership() {
        let mut directory = StreamDirectory::new();
        let mut rooms = RoomTracker::new();
        let owner = ConnectionId::new();
        start(&mut directory, &mut rooms, owner, "k1").unwrap();

        let missing = directory.stop_stream(&mut rooms, &owner, "k2").unwrap_err();
        assert_eq!(missing.relay_kind(), Some(RelayErrorKind::NoSuchStream));

        let intruder = ConnectionId::new();
        let not_owner = directory.stop_stream(&mut rooms, &intruder, "k1").unwrap_err();
        assert_eq!(not_owner.relay_kind(), Some(RelayErrorKind::NotOwner));
        assert!(rooms.contains("k1"));

        let viewer = ConnectionId::new();
        rooms.join("k1", viewer).unwrap();
        let (stopped, members) = directory.stop_stream(&mut rooms, &owner, "k1").unwrap();
        assert_eq!(stopped.id, "k1");
        assert!(members.contains(&viewer));
        assert!(!rooms.contains("k1"));
        assert!(directory.is_empty());
    }

    #[test]
    fn remove_by_owner_is_idempotent() {
        let mut directory = StreamDirectory::new();
        let mut rooms = RoomTracker::new();
        let owner = ConnectionId::new();
        start(&mut directory, &mut rooms, owner, "k1").unwrap();

        assert_eq!(directory.get_by_owner(&owner).map(|s| s.id.as_str()), Some("k1"));
        assert!(directory.remove_by_owner(&mut rooms, &owner).is_some());
        assert!(directory.remove_by_owner(&mut rooms, &owner).is_none());
        assert!(!rooms.contains("k1"));
    }

    #[test]
    fn listing_reflects_current_viewer_counts() {
        let mut directory = StreamDirectory::new();
        let mut rooms = RoomTracker::new();
        start(&mut directory, &mut rooms, ConnectionId::new(), "b").unwrap();
        start(&mut directory, &mut rooms, ConnectionId::new(), "a").unwrap();
        rooms.join("b", ConnectionId::new()).unwrap();
        rooms.join("b", ConnectionId::new()).unwrap();

        let listing = directory.list_streams(&rooms);
        let first: Vec<(String, usize)> = listing.clone().map(|s| (s.id, s.viewers)).collect();
        assert_eq!(first, vec![("a".to_string(), 0), ("b".to_string(), 2)]);

        let again: Vec<StreamSummary> = listing.collect();
        assert_eq!(again.len(), 2);
        assert!(again.iter().all(|s| s.is_live));
        assert_eq!(again[0].streamer, "Alice");
    }
}
