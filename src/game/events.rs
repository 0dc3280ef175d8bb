//! Session Events
//!
//! Notifications for the presentation layer, delivered in the order they
//! happened on the simulation task. Lobby contents are published separately
//! as a latest-value snapshot.

use crate::game::state::{EntityId, PeerId};

/// Something the UI layer may want to react to.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The welcome arrived (client only). The authority is always peer 1
    /// and never emits this.
    Established {
        /// This process's peer id
        local_peer: PeerId,
    },

    /// A peer joined the session (authoritative process only).
    PeerJoined {
        /// New peer
        peer: PeerId,
    },

    /// A peer left the session (authoritative process only).
    PeerLeft {
        /// Departed peer
        peer: PeerId,
    },

    /// An entity now exists.
    EntitySpawned {
        /// Entity id
        entity: EntityId,
        /// Its controlling peer
        controller: PeerId,
    },

    /// An entity was removed.
    EntityDespawned {
        /// Entity id
        entity: EntityId,
    },

    /// The gameplay scene should be loaded.
    SceneChanged {
        /// Opaque resource identifier
        resource_id: String,
    },

    /// The transport closed; session state was torn down.
    Disconnected {
        /// Human-readable cause
        reason: String,
    },
}

impl SessionEvent {
    /// Create an entity spawned event.
    pub fn entity_spawned(entity: EntityId, controller: PeerId) -> Self {
        Self::EntitySpawned { entity, controller }
    }

    /// Create a scene changed event.
    pub fn scene_changed(resource_id: impl Into<String>) -> Self {
        Self::SceneChanged {
            resource_id: resource_id.into(),
        }
    }

    /// Create a disconnected event.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    /// Peer the event is about, if any.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::Established { local_peer } => Some(*local_peer),
            Self::PeerJoined { peer } | Self::PeerLeft { peer } => Some(*peer),
            Self::EntitySpawned { controller, .. } => Some(*controller),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_peer() {
        assert_eq!(SessionEvent::PeerJoined { peer: PeerId(3) }.peer(), Some(PeerId(3)));
        assert_eq!(
            SessionEvent::entity_spawned(EntityId(1), PeerId(4)).peer(),
            Some(PeerId(4))
        );
        assert_eq!(SessionEvent::scene_changed("arena").peer(), None);
    }
}
