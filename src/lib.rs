#![deny(missing_debug_implementations)]
//! # Livecast relay
//! Signaling and presence relay for browser live streams. Streamers announce
//! streams, viewers join rooms to receive viewer counts and chat, and WebRTC
//! handshake messages are passed between two peers by connection id. Media
//! never flows through the relay, and all state lives in memory.
//!
//! Clients talk to the relay over a websocket, one JSON frame per event:
//! `{"event": "join-stream", "data": "my-stream"}`.

/// Configuration for [`server::run`].
pub mod config;
/// Live connections and outbound delivery.
pub mod connection;
pub mod error;
/// Inbound and outbound wire events.
pub mod event;
/// Viewer membership per stream.
pub mod room;
/// Router applies client events to relay state and decides who hears about it.
pub mod router;
/// HTTP and websocket transport.
pub mod server;
/// Pass-through of WebRTC handshake messages.
pub mod signaling;
/// Directory of live streams.
pub mod stream;
