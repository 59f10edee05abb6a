use tokio::sync::{mpsc, oneshot};

use crate::{
    connection::{ConnectionId, ConnectionRegistry, Outbox},
    error::{Error, RelayErrorKind},
    event::{
        ChatMessage, ChatRequest, InboundEvent, OutboundEvent, StartStream, ViewerCount, Welcome,
    },
    room::RoomTracker,
    signaling,
    stream::{StreamDirectory, StreamSummary},
};

/// Owns all relay state and applies one event at a time to it.
///
/// Every method runs to completion without awaiting, so the paired stream and
/// room updates are never observed half done.
#[derive(Debug, Default)]
pub struct Router {
    connections: ConnectionRegistry,
    streams: StreamDirectory,
    rooms: RoomTracker,
    last_chat_id: u64,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    /// Registers a connection and tells it its id.
    pub fn connect(&mut self, id: ConnectionId, outbox: Outbox) {
        if !self.connections.register(id, outbox) {
            tracing::warn!(connection = %id, "Connection is already registered");
            return;
        }
        tracing::info!(connection = %id, total = self.connections.len(), "User connected");
        self.connections.send_to(
            &id,
            OutboundEvent::Connected(Welcome { connection_id: id }),
        );
    }

    pub fn handle(&mut self, from: ConnectionId, event: InboundEvent) -> Result<(), Error> {
        if !self.connections.is_connected(&from) {
            return Err(Error::new_relay(
                format!("{} from unregistered connection {}", event.name(), from),
                RelayErrorKind::UnknownConnection,
            ));
        }

        match event {
            InboundEvent::StartStream(req) => self.start_stream(from, req),
            InboundEvent::StopStream(r) => self.stop_stream(from, &r.stream_id),
            InboundEvent::JoinStream(r) => self.join_stream(from, &r.stream_id),
            InboundEvent::LeaveStream(r) => {
                self.leave_stream(from, &r.stream_id);
                Ok(())
            }
            InboundEvent::ChatMessage(req) => self.chat_message(req),
            InboundEvent::Signal(kind, req) => {
                signaling::forward(&self.connections, from, kind, req)
            }
            InboundEvent::GetStreams => {
                let list = self.list_streams();
                self.connections.send_to(&from, OutboundEvent::StreamsList(list));
                Ok(())
            }
        }
    }

    /// Revokes every role the connection held: viewer of any room first, then
    /// owner of a stream. Safe to call for connections that held neither.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if !self.connections.unregister(&id) {
            tracing::debug!(connection = %id, "Disconnect for unknown connection");
        }
        tracing::info!(
            connection = %id,
            rooms = ?self.rooms.rooms_of(&id),
            "User disconnected"
        );

        for (stream_id, count) in self.rooms.remove_connection_everywhere(&id) {
            self.broadcast_viewer_count(&stream_id, count);
        }

        if let Some((stream, _viewers)) = self.streams.remove_by_owner(&mut self.rooms, &id) {
            tracing::info!(
                stream = %stream.id,
                title = %stream.title,
                "Stream ended due to streamer disconnect"
            );
            self.connections
                .broadcast(&OutboundEvent::StreamEnded(stream.id), None);
        }
    }

    pub fn list_streams(&self) -> Vec<StreamSummary> {
        self.streams.list_streams(&self.rooms).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn start_stream(&mut self, from: ConnectionId, req: StartStream) -> Result<(), Error> {
        let stream = self.streams.start_stream(
            &mut self.rooms,
            from,
            req.stream_id,
            req.title,
            req.display_name,
        )?;
        tracing::info!(
            stream = %stream.id,
            title = %stream.title,
            streamer = %stream.display_name,
            "Stream started"
        );
        let summary = stream.summary(0);
        self.connections
            .broadcast(&OutboundEvent::NewStream(summary), Some(&from));
        Ok(())
    }

    fn stop_stream(&mut self, from: ConnectionId, stream_id: &str) -> Result<(), Error> {
        let (stream, viewers) = self.streams.stop_stream(&mut self.rooms, &from, stream_id)?;
        tracing::info!(
            stream = %stream.id,
            title = %stream.title,
            viewers = viewers.len(),
            "Stream stopped"
        );
        self.connections
            .broadcast(&OutboundEvent::StreamEnded(stream.id), None);
        Ok(())
    }

    fn join_stream(&mut self, from: ConnectionId, stream_id: &str) -> Result<(), Error> {
        let count = self.rooms.join(stream_id, from)?;
        tracing::info!(stream = stream_id, viewers = count, "Viewer joined stream");
        self.broadcast_viewer_count(stream_id, count);
        Ok(())
    }

    fn leave_stream(&mut self, from: ConnectionId, stream_id: &str) {
        if !self.rooms.contains(stream_id) {
            tracing::debug!(stream = stream_id, "Leave for a stream that is not live");
            return;
        }
        let count = self.rooms.leave(stream_id, &from);
        tracing::info!(stream = stream_id, viewers = count, "Viewer left stream");
        self.broadcast_viewer_count(stream_id, count);
    }

    fn chat_message(&mut self, req: ChatRequest) -> Result<(), Error> {
        if !self.rooms.contains(&req.stream_id) {
            return Err(Error::new_relay(
                format!("Chat for stream {} which is not live", req.stream_id),
                RelayErrorKind::NoSuchStream,
            ));
        }
        self.last_chat_id += 1;
        let message = ChatMessage {
            id: self.last_chat_id.to_string(),
            author: req.author,
            text: req.text,
            timestamp: chrono::Utc::now(),
        };
        tracing::debug!(
            stream = %req.stream_id,
            author = %message.author,
            "Chat message: {}",
            message.text
        );
        self.connections.send_to_group(
            self.rooms.members(&req.stream_id),
            &OutboundEvent::NewChatMessage(message),
        );
        Ok(())
    }

    fn broadcast_viewer_count(&self, stream_id: &str, count: usize) {
        let event = OutboundEvent::ViewerCountUpdate(ViewerCount {
            stream_id: stream_id.to_string(),
            count,
        });
        self.connections
            .send_to_group(self.rooms.members(stream_id), &event);
    }

    /// Drains `event_receiver` into `router` until closed.
    pub async fn router_event_loop(
        mut router: Router,
        mut event_receiver: mpsc::UnboundedReceiver<RouterEvent>,
    ) {
        while let Some(event) = event_receiver.recv().await {
            match event {
                RouterEvent::Connected(id, outbox) => router.connect(id, outbox),
                RouterEvent::Inbound(id, inbound) => {
                    let name = inbound.name();
                    if let Err(err) = router.handle(id, inbound) {
                        tracing::warn!(connection = %id, "dropped {}: {}", name, err);
                    }
                }
                RouterEvent::Disconnected(id) => router.disconnect(id),
                RouterEvent::ListStreams(reply_sender) => {
                    let _ = reply_sender.send(router.list_streams());
                }
                RouterEvent::Closed => {
                    break;
                }
            }
        }
        tracing::info!(
            "Router event loop finished with {} connections",
            router.connection_count()
        );
    }
}

#[derive(Debug)]
pub enum RouterEvent {
    Connected(ConnectionId, Outbox),
    Inbound(ConnectionId, InboundEvent),
    Disconnected(ConnectionId),
    ListStreams(oneshot::Sender<Vec<StreamSummary>>),
    Closed,
}

/// Cloneable entry point into a running router loop.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    router_event_sender: mpsc::UnboundedSender<RouterEvent>,
}

impl RouterHandle {
    /// Moves `router` into its own task. Must be called within a tokio runtime.
    pub fn spawn(router: Router) -> RouterHandle {
        let (tx, rx) = mpsc::unbounded_channel::<RouterEvent>();
        tokio::spawn(async move {
            Router::router_event_loop(router, rx).await;
        });
        RouterHandle {
            router_event_sender: tx,
        }
    }

    /// Registers a new connection whose outbound events go to `outbox`.
    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId::new();
        self.send(RouterEvent::Connected(id, outbox));
        id
    }

    pub fn dispatch(&self, id: ConnectionId, event: InboundEvent) {
        self.send(RouterEvent::Inbound(id, event));
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.send(RouterEvent::Disconnected(id));
    }

    /// Current streams, or `None` once the loop has stopped.
    pub async fn list_streams(&self) -> Option<Vec<StreamSummary>> {
        let (tx, rx) = oneshot::channel();
        self.send(RouterEvent::ListStreams(tx));
        rx.await.ok()
    }

    pub fn close(&self) {
        self.send(RouterEvent::Closed);
    }

    fn send(&self, event: RouterEvent) {
        if self.router_event_sender.send(event).is_err() {
            tracing::error!("Router event loop is not running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connection::Inbox,
        event::{SignalRequest, StreamRef},
        signaling::SignalKind,
    };
    use serde_json::json;

    struct Peer {
        id: ConnectionId,
        inbox: Inbox,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<OutboundEvent> {
            let mut events = vec![];
            while let Ok(event) = self.inbox.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn connect(router: &mut Router) -> Peer {
        let (tx, mut inbox) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        router.connect(id, tx);
        assert_eq!(
            inbox.try_recv().unwrap(),
            OutboundEvent::Connected(Welcome { connection_id: id })
        );
        Peer { id, inbox }
    }

    fn start(id: &str, title: &str) -> InboundEvent {
        InboundEvent::StartStream(StartStream {
            stream_id: id.to_string(),
            title: title.to_string(),
            display_name: "Streamer".to_string(),
        })
    }

    fn stream_ref(id: &str) -> StreamRef {
        StreamRef {
            stream_id: id.to_string(),
        }
    }

    fn count_update(id: &str, count: usize) -> OutboundEvent {
        OutboundEvent::ViewerCountUpdate(ViewerCount {
            stream_id: id.to_string(),
            count,
        })
    }

    #[test]
    fn stop_of_unknown_stream_emits_nothing() {
        let mut router = Router::new();
        let mut a = connect(&mut router);
        let mut b = connect(&mut router);

        let err = router
            .handle(a.id, InboundEvent::StopStream(stream_ref("ghost")))
            .unwrap_err();

        assert_eq!(err.relay_kind(), Some(RelayErrorKind::NoSuchStream));
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
    }

    #[test]
    fn stop_by_non_owner_is_rejected() {
        let mut router = Router::new();
        let a = connect(&mut router);
        let mut b = connect(&mut router);
        router.handle(a.id, start("k1", "Demo")).unwrap();
        b.drain();

        let err = router
            .handle(b.id, InboundEvent::StopStream(stream_ref("k1")))
            .unwrap_err();

        assert_eq!(err.relay_kind(), Some(RelayErrorKind::NotOwner));
        assert!(b.drain().is_empty());
        assert_eq!(router.list_streams().len(), 1);
    }

    #[test]
    fn owner_stop_notifies_everyone() {
        let mut router = Router::new();
        let mut a = connect(&mut router);
        let mut b = connect(&mut router);
        router.handle(a.id, start("k1", "Demo")).unwrap();
        b.drain();

        router
            .handle(a.id, InboundEvent::StopStream(stream_ref("k1")))
            .unwrap();

        let ended = OutboundEvent::StreamEnded("k1".to_string());
        assert_eq!(a.drain(), vec![ended.clone()]);
        assert_eq!(b.drain(), vec![ended]);
        let err = router
            .handle(b.id, InboundEvent::JoinStream(stream_ref("k1")))
            .unwrap_err();
        assert_eq!(err.relay_kind(), Some(RelayErrorKind::NoSuchStream));
    }

    #[test]
    fn nameless_start_announces_stream_to_others() {
        let mut router = Router::new();
        let mut a = connect(&mut router);
        let mut b = connect(&mut router);
        let mut c = connect(&mut router);

        let event = InboundEvent::decode(
            r#"{"event":"start-stream","data":{"streamId":"k1","title":"Demo"}}"#,
        )
        .unwrap();
        router.handle(a.id, event).unwrap();

        for peer in [&mut b, &mut c] {
            match peer.drain().as_slice() {
                [OutboundEvent::NewStream(summary)] => {
                    assert_eq!(summary.id, "k1");
                    assert_eq!(summary.title, "Demo");
                    assert_eq!(summary.streamer, "");
                    assert_eq!(summary.owner_connection, a.id);
                }
                other => panic!("expected one new-stream, got {:?}", other),
            }
        }
        assert!(a.drain().is_empty());
    }

    #[test]
    fn duplicate_start_keeps_existing_stream() {
        let mut router = Router::new();
        let a = connect(&mut router);
        let mut b = connect(&mut router);
        router.handle(a.id, start("k1", "Demo")).unwrap();
        b.drain();
        let before = router.list_streams();

        let err = router.handle(b.id, start("k1", "Hijack")).unwrap_err();

        assert_eq!(err.relay_kind(), Some(RelayErrorKind::DuplicateStream));
        assert_eq!(router.list_streams(), before);
        assert_eq!(before[0].owner_connection, a.id);
        assert!(b.drain().is_empty());
    }

    #[test]
    fn viewer_counts_follow_joins_and_disconnects() {
        let mut router = Router::new();
        let owner = connect(&mut router);
        router.handle(owner.id, start("k1", "Demo")).unwrap();

        let mut viewers: Vec<Peer> = (0..3).map(|_| connect(&mut router)).collect();
        for viewer in viewers.iter() {
            router
                .handle(viewer.id, InboundEvent::JoinStream(stream_ref("k1")))
                .unwrap();
        }
        let last = viewers.last_mut().unwrap().drain();
        assert_eq!(last, vec![count_update("k1", 3)]);

        let gone = viewers.remove(0);
        router.disconnect(gone.id);

        for viewer in viewers.iter_mut() {
            assert_eq!(viewer.drain().last(), Some(&count_update("k1", 2)));
        }
        assert_eq!(router.list_streams()[0].viewers, 2);
    }

    #[test]
    fn repeated_join_and_leave_settle_on_last_operation() {
        let mut router = Router::new();
        let owner = connect(&mut router);
        router.handle(owner.id, start("k1", "Demo")).unwrap();
        let mut viewer = connect(&mut router);

        for _ in 0..2 {
            router
                .handle(viewer.id, InboundEvent::JoinStream(stream_ref("k1")))
                .unwrap();
        }
        assert_eq!(router.list_streams()[0].viewers, 1);
        for _ in 0..2 {
            router
                .handle(viewer.id, InboundEvent::LeaveStream(stream_ref("k1")))
                .unwrap();
        }
        assert_eq!(router.list_streams()[0].viewers, 0);
        router
            .handle(viewer.id, InboundEvent::LeaveStream(stream_ref("ghost")))
            .unwrap();

        assert_eq!(
            viewer.drain(),
            vec![count_update("k1", 1), count_update("k1", 1)]
        );
    }

    #[test]
    fn chat_reaches_room_only_with_increasing_ids() {
        let mut router = Router::new();
        let owner = connect(&mut router);
        router.handle(owner.id, start("k1", "Demo")).unwrap();
        let mut viewer = connect(&mut router);
        let mut outsider = connect(&mut router);
        outsider.drain();
        router
            .handle(viewer.id, InboundEvent::JoinStream(stream_ref("k1")))
            .unwrap();
        viewer.drain();

        for text in ["hi", "again"] {
            router
                .handle(
                    viewer.id,
                    InboundEvent::ChatMessage(ChatRequest {
                        stream_id: "k1".to_string(),
                        author: "B".to_string(),
                        text: text.to_string(),
                    }),
                )
                .unwrap();
        }

        let received: Vec<ChatMessage> = viewer
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::NewChatMessage(message) => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].text, "hi");
        assert_eq!(received[1].text, "again");
        assert!(received[0].id.parse::<u64>().unwrap() < received[1].id.parse::<u64>().unwrap());
        assert!(outsider.drain().is_empty());

        let err = router
            .handle(
                viewer.id,
                InboundEvent::ChatMessage(ChatRequest {
                    stream_id: "ghost".to_string(),
                    author: "B".to_string(),
                    text: "hello?".to_string(),
                }),
            )
            .unwrap_err();
        assert_eq!(err.relay_kind(), Some(RelayErrorKind::NoSuchStream));
    }

    #[test]
    fn owner_disconnect_ends_stream_once() {
        let mut router = Router::new();
        let owner = connect(&mut router);
        router.handle(owner.id, start("k1", "Demo")).unwrap();
        let mut viewer = connect(&mut router);
        router
            .handle(viewer.id, InboundEvent::JoinStream(stream_ref("k1")))
            .unwrap();
        viewer.drain();

        router.disconnect(owner.id);
        router.disconnect(owner.id);

        assert_eq!(
            viewer.drain(),
            vec![OutboundEvent::StreamEnded("k1".to_string())]
        );
        assert!(router.list_streams().is_empty());
        let err = router
            .handle(viewer.id, InboundEvent::JoinStream(stream_ref("k1")))
            .unwrap_err();
        assert_eq!(err.relay_kind(), Some(RelayErrorKind::NoSuchStream));
    }

    #[test]
    fn signaling_reaches_only_live_targets() {
        let mut router = Router::new();
        let a = connect(&mut router);
        let mut b = connect(&mut router);

        router
            .handle(
                a.id,
                InboundEvent::Signal(
                    SignalKind::Offer,
                    SignalRequest {
                        target: b.id,
                        payload: json!({ "sdp": "v=0" }),
                    },
                ),
            )
            .unwrap();
        match b.drain().as_slice() {
            [OutboundEvent::Offer(relay)] => assert_eq!(relay.sender_connection, a.id),
            other => panic!("unexpected events {:?}", other),
        }

        router.disconnect(b.id);
        let err = router
            .handle(
                a.id,
                InboundEvent::Signal(
                    SignalKind::Answer,
                    SignalRequest {
                        target: b.id,
                        payload: json!({}),
                    },
                ),
            )
            .unwrap_err();
        assert_eq!(err.relay_kind(), Some(RelayErrorKind::UnknownTarget));
    }

    #[test]
    fn get_streams_answers_only_the_caller() {
        let mut router = Router::new();
        let owner = connect(&mut router);
        router.handle(owner.id, start("k1", "Demo")).unwrap();
        let mut asker = connect(&mut router);
        let mut other = connect(&mut router);

        router.handle(asker.id, InboundEvent::GetStreams).unwrap();

        match asker.drain().as_slice() {
            [OutboundEvent::StreamsList(list)] => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].id, "k1");
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert!(other.drain().is_empty());
    }

    #[test]
    fn events_from_unregistered_connection_are_rejected() {
        let mut router = Router::new();
        let err = router
            .handle(ConnectionId::new(), InboundEvent::GetStreams)
            .unwrap_err();
        assert_eq!(err.relay_kind(), Some(RelayErrorKind::UnknownConnection));

        let gone = connect(&mut router);
        router.disconnect(gone.id);
        let err = router.handle(gone.id, start("k1", "Demo")).unwrap_err();
        assert_eq!(err.relay_kind(), Some(RelayErrorKind::UnknownConnection));
        assert!(router.list_streams().is_empty());
    }
}
