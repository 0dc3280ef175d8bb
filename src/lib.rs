//! # Lobby Authority
//!
//! Authoritative networking core for a small multiplayer session: who may
//! mutate which entity, server-side simulation of untrusted input, a
//! replicated lobby with a start gate, and the host/join lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LOBBY AUTHORITY                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Math primitives                           │
//! │  ├── vec3.rs     - 3D vector, yaw rotation                   │
//! │  └── angle.rs    - Angle wrapping                            │
//! │                                                              │
//! │  game/           - Session rules (synchronous)               │
//! │  ├── state.rs    - Peer/entity ids, entity world             │
//! │  ├── authority.rs- Entity ownership registry                 │
//! │  ├── input.rs    - Button sampling, request sanitizing       │
//! │  ├── facing.rs   - Yaw prediction / authoritative yaw        │
//! │  ├── tick.rs     - Fixed-tick kinematic simulation           │
//! │  ├── lobby.rs    - Ledger, snapshot, receiver mirror         │
//! │  └── events.rs   - Notifications for the UI layer            │
//! │                                                              │
//! │  network/        - Transport and lifecycle (async)           │
//! │  ├── protocol.rs - Wire messages                             │
//! │  ├── transport.rs- Event/outbound routing types              │
//! │  ├── websocket.rs- WebSocket listener and connector          │
//! │  ├── session.rs  - Authority and client session state        │
//! │  └── server.rs   - Session manager and simulation task       │
//! │                                                              │
//! │  config.rs       - Environment-driven configuration          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust Model
//!
//! Peer 1 is always the authoritative process. Requests never carry a
//! sender identity: the transport attaches it, and every mutation of an
//! entity is checked against the authority registry before it happens.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{SessionConfig, SessionMode};
pub use crate::core::vec3::Vec3;
pub use game::events::SessionEvent;
pub use game::lobby::{LobbyPlayer, LobbySnapshot};
pub use game::state::{EntityId, PeerId};
pub use network::{SessionCommand, SessionError, SessionHandle, SessionManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Port used when none (or an invalid one) is configured
pub const DEFAULT_PORT: u16 = 7777;

/// Address used when none (or an invalid one) is configured
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
