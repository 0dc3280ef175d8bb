//! Protocol Messages
//!
//! Wire format for the remote procedures exchanged over the transport.
//! Every message is a JSON text frame with a `type` tag.
//!
//! Requests never carry the sender's identity. The receiver takes it from
//! the transport. Entity ids in requests only address the target.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::core::vec3::Vec3;
use crate::game::lobby::{LobbyPlayer, LobbySnapshot};
use crate::game::state::{EntityId, EntityState, PeerId};

/// Largest accepted frame. The transport refuses a larger one from its
/// header and closes that connection.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

// =============================================================================
// CLIENT -> AUTHORITY MESSAGES
// =============================================================================

/// Messages sent from a client to the authoritative process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Movement input for an entity the sender controls.
    RequestMove(MoveRequest),

    /// Raw yaw change for an entity the sender controls.
    RequestYawDelta {
        /// Target entity
        entity: EntityId,
        /// Radians, positive turns left
        yaw_delta: f32,
    },

    /// Set the sender's own ready flag.
    RequestReadyState {
        /// Desired flag
        ready: bool,
    },

    /// Ask the authority to start the game. Host only.
    RequestStartGame,

    /// Change the sender's own display name.
    RequestDisplayName {
        /// Requested name, sanitized by the receiver
        name: String,
    },
}

/// Movement input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Target entity
    pub entity: EntityId,
    /// Entity-local direction (unit or zero)
    pub direction: [f32; 3],
    /// Jump pressed this tick
    pub jump: bool,
}

// =============================================================================
// AUTHORITY -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from the authoritative process to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on a new connection.
    Welcome(WelcomeInfo),

    /// Full lobby player list. Replaces the receiver's copy.
    PushLobbySnapshot {
        /// Players ordered by peer id
        #[serde(deserialize_with = "lenient_entries")]
        players: Vec<LobbyPlayerEntry>,
    },

    /// Load the gameplay scene.
    LoadGameplayScene {
        /// Opaque resource identifier
        resource_id: String,
    },

    /// An entity now exists.
    EntitySpawned(EntitySpawnInfo),

    /// An entity was removed.
    EntityDespawned {
        /// Removed entity
        entity: EntityId,
    },

    /// Authoritative kinematic state after a tick.
    EntityStates(EntityStatesUpdate),
}

/// Parse snapshot entries one at a time so a malformed entry is skipped
/// instead of discarding the whole snapshot.
fn lenient_entries<'de, D>(deserializer: D) -> Result<Vec<LobbyPlayerEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(index, "Skipping malformed lobby entry: {}", e);
                None
            }
        })
        .collect())
}

/// Welcome payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Peer id the transport assigned to the receiver
    pub peer_id: PeerId,
    /// Session identifier (UUID string)
    pub session_id: String,
    /// Server simulation rate (Hz)
    pub tick_rate: u32,
}

/// Lobby entry as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyPlayerEntry {
    /// Peer identifier
    pub peer_id: PeerId,
    /// Display name
    pub name: String,
    /// Ready flag
    pub is_ready: bool,
    /// Host flag
    pub is_host: bool,
}

impl From<&LobbyPlayer> for LobbyPlayerEntry {
    fn from(player: &LobbyPlayer) -> Self {
        Self {
            peer_id: player.peer_id,
            name: player.display_name.clone(),
            is_ready: player.is_ready,
            is_host: player.is_host,
        }
    }
}

impl From<LobbyPlayerEntry> for LobbyPlayer {
    fn from(entry: LobbyPlayerEntry) -> Self {
        Self {
            peer_id: entry.peer_id,
            display_name: entry.name,
            is_ready: entry.is_ready,
            is_host: entry.is_host,
        }
    }
}

/// Spawn notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawnInfo {
    /// New entity
    pub entity: EntityId,
    /// Its controlling peer
    pub controller: PeerId,
    /// Spawn position
    pub position: [f32; 3],
    /// Spawn yaw
    pub yaw: f32,
}

impl From<&EntityState> for EntitySpawnInfo {
    fn from(state: &EntityState) -> Self {
        Self {
            entity: state.id,
            controller: state.controller,
            position: state.position.to_array(),
            yaw: state.yaw,
        }
    }
}

/// Per-tick replicated entity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStatesUpdate {
    /// Server tick the states belong to
    pub tick: u32,
    /// One entry per entity
    pub entities: Vec<EntityStateUpdate>,
}

/// Replicated state of one entity. Pending input is never replicated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityStateUpdate {
    /// Entity id
    pub entity: EntityId,
    /// World position
    pub position: [f32; 3],
    /// World velocity
    pub velocity: [f32; 3],
    /// Authoritative yaw
    pub yaw: f32,
    /// Grounded flag
    pub grounded: bool,
}

impl From<&EntityState> for EntityStateUpdate {
    fn from(state: &EntityState) -> Self {
        Self {
            entity: state.id,
            position: state.position.to_array(),
            velocity: state.velocity.to_array(),
            yaw: state.yaw,
            grounded: state.grounded,
        }
    }
}

impl EntityStateUpdate {
    /// Position as a vector.
    pub fn position_vec(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl ClientMessage {
    /// Build a move request.
    pub fn request_move(entity: EntityId, direction: Vec3, jump: bool) -> Self {
        Self::RequestMove(MoveRequest {
            entity,
            direction: direction.to_array(),
            jump,
        })
    }
}

impl ServerMessage {
    /// Full-list lobby push built from copies of the snapshot's players.
    pub fn lobby_snapshot(snapshot: &LobbySnapshot) -> Self {
        Self::PushLobbySnapshot {
            players: snapshot.players().iter().map(LobbyPlayerEntry::from).collect(),
        }
    }

    /// Gameplay scene instruction.
    pub fn load_gameplay_scene(resource_id: impl Into<String>) -> Self {
        Self::LoadGameplayScene {
            resource_id: resource_id.into(),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
