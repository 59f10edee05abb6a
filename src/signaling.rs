use crate::{
    connection::{ConnectionId, ConnectionRegistry},
    error::{Error, RelayErrorKind},
    event::{OutboundEvent, SignalRelay, SignalRequest},
};

/// The three WebRTC handshake messages the relay passes between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }

    fn outbound(self, relay: SignalRelay) -> OutboundEvent {
        match self {
            SignalKind::Offer => OutboundEvent::Offer(relay),
            SignalKind::Answer => OutboundEvent::Answer(relay),
            SignalKind::IceCandidate => OutboundEvent::IceCandidate(relay),
        }
    }
}

/// Passes a handshake message to its target, stamped with the sender.
///
/// The payload is never inspected. Fails with `UnknownTarget` when the target
/// is not connected or is the sender itself.
pub fn forward(
    connections: &ConnectionRegistry,
    sender: ConnectionId,
    kind: SignalKind,
    request: SignalRequest,
) -> Result<(), Error> {
    let target = request.target;
    if target == sender || !connections.is_connected(&target) {
        return Err(Error::new_relay(
            format!("{} target {} is not reachable", kind.name(), target),
            RelayErrorKind::UnknownTarget,
        ));
    }

    let event = kind.outbound(SignalRelay {
        payload: request.payload,
        sender_connection: sender,
    });
    if !connections.send_to(&target, event) {
        return Err(Error::new_relay(
            format!("{} target {} has gone away", kind.name(), target),
            RelayErrorKind::UnknownTarget,
        ));
    }
    tracing::trace!(from = %sender, to = %target, "relayed {}", kind.name());
    Ok(())
}
