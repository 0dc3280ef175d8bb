//! Transport Events and Routing
//!
//! The simulation task never touches sockets. Connection tasks hand it
//! [`TransportEvent`]s through an mpsc queue, and it answers with
//! [`Outbound`] messages that the transport delivers without blocking.

use thiserror::Error;

use crate::game::state::PeerId;
use crate::network::protocol::{ClientMessage, ServerMessage};

/// Capacity of the inbound event queue feeding the simulation task.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Inbound event on the authoritative process.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A remote peer finished the handshake and can be sent to.
    PeerConnected(PeerId),
    /// A remote peer's connection closed.
    PeerDisconnected(PeerId),
    /// A decoded request. `from` is resolved by the transport.
    Message {
        /// Sender identity
        from: PeerId,
        /// Request
        msg: ClientMessage,
    },
}

/// Inbound event on a client process.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A decoded message from the authority.
    Message(ServerMessage),
    /// The connection to the authority is gone.
    Closed {
        /// Human-readable cause
        reason: String,
    },
}

/// Who an outbound message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// A single remote peer.
    Peer(PeerId),
    /// Every connected remote peer. The authority applies local effects
    /// itself rather than sending to its own id.
    AllRemote,
}

/// A message queued by the session for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Destination
    pub recipient: Recipient,
    /// Payload
    pub msg: ServerMessage,
}

impl Outbound {
    /// Message for one peer.
    pub fn to(peer: PeerId, msg: ServerMessage) -> Self {
        Self {
            recipient: Recipient::Peer(peer),
            msg,
        }
    }

    /// Message for every remote peer.
    pub fn broadcast(msg: ServerMessage) -> Self {
        Self {
            recipient: Recipient::AllRemote,
            msg,
        }
    }

    /// True if `peer` should receive this message.
    pub fn is_for(&self, peer: PeerId) -> bool {
        match self.recipient {
            Recipient::Peer(target) => target == peer,
            Recipient::AllRemote => !peer.is_host(),
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind the listening socket.
    #[error("failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// Failed to connect or complete the WebSocket handshake.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The target address could not be used.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> ServerMessage {
        ServerMessage::load_gameplay_scene("arena")
    }

    #[test]
    fn test_direct_recipient() {
        let out = Outbound::to(PeerId(3), msg());
        assert!(out.is_for(PeerId(3)));
        assert!(!out.is_for(PeerId(4)));
    }

    #[test]
    fn test_broadcast_skips_authority() {
        let out = Outbound::broadcast(msg());
        assert!(out.is_for(PeerId(2)));
        assert!(out.is_for(PeerId(9)));
        assert!(!out.is_for(PeerId::HOST));
    }
}
