//! Network Layer
//!
//! WebSocket transport, wire protocol and the session state driven by it.
//! Sockets live in their own tasks; all session state is touched only by
//! the simulation task.

pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage, LobbyPlayerEntry, EntityStateUpdate};
pub use server::{SessionHandle, SessionManager, SessionRole};
pub use session::{AuthorityRole, AuthoritySession, ClientSession, EntityView, SessionCommand, SessionError};
pub use transport::{LinkEvent, Outbound, Recipient, TransportError, TransportEvent};
pub use websocket::{ServerLink, WsServer};
