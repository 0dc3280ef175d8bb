//! Game Logic Module
//!
//! Authority, simulation and lobby state. Everything here is synchronous and
//! owned by the single simulation task.
//!
//! ## Module Structure
//!
//! - `state`: Peer/entity ids and the entity world
//! - `authority`: Who may mutate which entity
//! - `input`: Button sampling, pending input, request sanitizing
//! - `facing`: Yaw prediction and authoritative yaw
//! - `tick`: Fixed-tick movement simulation
//! - `lobby`: Membership/readiness ledger, snapshot, receiver mirror
//! - `events`: Notifications for the presentation layer

pub mod authority;
pub mod events;
pub mod facing;
pub mod input;
pub mod lobby;
pub mod state;
pub mod tick;

// Re-export key types
pub use authority::{AuthorityBinding, AuthorityError, AuthorityRegistry, AuthorityScope, ControlPart};
pub use events::SessionEvent;
pub use facing::FacingPredictor;
pub use input::{InputButtons, InputSampler, PendingInput};
pub use lobby::{LobbyLedger, LobbyMirror, LobbyPlayer, LobbySnapshot, StartRejection};
pub use state::{EntityId, EntityState, PeerId, World};
pub use tick::{FlatGround, Ground, MovementConfig, TickResult};
