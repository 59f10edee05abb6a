use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    connection::ConnectionId,
    error::{Error, RelayErrorKind},
    signaling::SignalKind,
    stream::StreamSummary,
};

/// One frame on the wire: an event name with its payload.
#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Events a client may send, already checked for shape.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    StartStream(StartStream),
    StopStream(StreamRef),
    JoinStream(StreamRef),
    LeaveStream(StreamRef),
    ChatMessage(ChatRequest),
    Signal(SignalKind, SignalRequest),
    GetStreams,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartStream {
    #[serde(alias = "streamKey")]
    pub stream_id: String,
    pub title: String,
    /// Empty when the client sends no name.
    #[serde(default, alias = "streamer")]
    pub display_name: String,
}

/// A stream id, sent either bare or as `{"streamId": ...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRef {
    pub stream_id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StreamRefWire {
    Bare(String),
    #[serde(rename_all = "camelCase")]
    Object {
        #[serde(alias = "streamKey")]
        stream_id: String,
    },
}

impl<'de> Deserialize<'de> for StreamRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let stream_id = match StreamRefWire::deserialize(deserializer)? {
            StreamRefWire::Bare(stream_id) => stream_id,
            StreamRefWire::Object { stream_id } => stream_id,
        };
        Ok(StreamRef { stream_id })
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(alias = "streamKey")]
    pub stream_id: String,
    #[serde(alias = "username")]
    pub author: String,
    #[serde(alias = "message")]
    pub text: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SignalRequest {
    #[serde(rename = "targetConnection", alias = "target")]
    pub target: ConnectionId,
    #[serde(alias = "offer", alias = "answer", alias = "candidate")]
    pub payload: Value,
}

impl InboundEvent {
    /// Parses and validates one text frame.
    pub fn decode(text: &str) -> Result<InboundEvent, Error> {
        let envelope: Envelope = serde_json::from_str(text).map_err(malformed)?;
        let event = match envelope.event.as_str() {
            "start-stream" => InboundEvent::StartStream(payload(envelope.data)?),
            "stop-stream" => InboundEvent::StopStream(payload(envelope.data)?),
            "join-stream" => InboundEvent::JoinStream(payload(envelope.data)?),
            "leave-stream" => InboundEvent::LeaveStream(payload(envelope.data)?),
            "chat-message" => InboundEvent::ChatMessage(payload(envelope.data)?),
            "offer" => InboundEvent::Signal(SignalKind::Offer, payload(envelope.data)?),
            "answer" => InboundEvent::Signal(SignalKind::Answer, payload(envelope.data)?),
            "ice-candidate" => {
                InboundEvent::Signal(SignalKind::IceCandidate, payload(envelope.data)?)
            }
            "get-streams" => InboundEvent::GetStreams,
            other => {
                return Err(Error::new_relay(
                    format!("unknown event {}", other),
                    RelayErrorKind::MalformedEvent,
                ))
            }
        };
        event.validate()?;
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::StartStream(_) => "start-stream",
            InboundEvent::StopStream(_) => "stop-stream",
            InboundEvent::JoinStream(_) => "join-stream",
            InboundEvent::LeaveStream(_) => "leave-stream",
            InboundEvent::ChatMessage(_) => "chat-message",
            InboundEvent::Signal(kind, _) => kind.name(),
            InboundEvent::GetStreams => "get-streams",
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let stream_id = match self {
            InboundEvent::StartStream(req) => &req.stream_id,
            InboundEvent::StopStream(r)
            | InboundEvent::JoinStream(r)
            | InboundEvent::LeaveStream(r) => &r.stream_id,
            InboundEvent::ChatMessage(req) => &req.stream_id,
            InboundEvent::Signal(..) | InboundEvent::GetStreams => return Ok(()),
        };
        if stream_id.trim().is_empty() {
            return Err(Error::new_relay(
                format!("{} requires a non-empty stream id", self.name()),
                RelayErrorKind::MalformedEvent,
            ));
        }
        Ok(())
    }
}

fn payload<T: DeserializeOwned>(data: Value) -> Result<T, Error> {
    serde_json::from_value(data).map_err(malformed)
}

fn malformed(err: serde_json::Error) -> Error {
    Error::new_relay(err.to_string(), RelayErrorKind::MalformedEvent)
}

/// Events the relay sends to clients.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    Connected(Welcome),
    NewStream(StreamSummary),
    StreamEnded(String),
    ViewerCountUpdate(ViewerCount),
    NewChatMessage(ChatMessage),
    Offer(SignalRelay),
    Answer(SignalRelay),
    IceCandidate(SignalRelay),
    StreamsList(Vec<StreamSummary>),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Connected(_) => "connected",
            OutboundEvent::NewStream(_) => "new-stream",
            OutboundEvent::StreamEnded(_) => "stream-ended",
            OutboundEvent::ViewerCountUpdate(_) => "viewer-count-update",
            OutboundEvent::NewChatMessage(_) => "new-chat-message",
            OutboundEvent::Offer(_) => "offer",
            OutboundEvent::Answer(_) => "answer",
            OutboundEvent::IceCandidate(_) => "ice-candidate",
            OutboundEvent::StreamsList(_) => "streams-list",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: ConnectionId,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewerCount {
    pub stream_id: String,
    pub count: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalRelay {
    pub payload: Value,
    pub sender_connection: ConnectionId,
}
