//! Session State Definitions
//!
//! Peer and entity identifiers plus the authoritative entity world.
//! Uses BTreeMap so iteration (and therefore broadcast order) is stable.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::vec3::Vec3;
use crate::game::input::PendingInput;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Transport-assigned peer identifier.
///
/// Unique for the lifetime of a session. `PeerId::HOST` is the authoritative
/// process; `0` is never assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The authoritative process in every topology.
    pub const HOST: PeerId = PeerId(1);

    /// First id handed out to remote peers.
    pub const FIRST_REMOTE: PeerId = PeerId(2);

    /// Create from a raw id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw integer value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// True for the authoritative process id.
    pub const fn is_host(self) -> bool {
        self.0 == Self::HOST.0
    }

    /// Zero is reserved and never valid on the wire.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity identifier, assigned by the authoritative process at spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// ENTITY STATE
// =============================================================================

/// Authoritative kinematic state of one controllable entity.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityState {
    /// Entity identifier
    pub id: EntityId,
    /// Peer whose input drives this entity (fixed for the entity's lifetime)
    pub controller: PeerId,
    /// World position
    pub position: Vec3,
    /// World velocity from the last tick
    pub velocity: Vec3,
    /// Authoritative facing in radians, wrapped to (-PI, PI]
    pub yaw: f32,
    /// Standing on the ground after the last tick
    pub grounded: bool,
    /// Latest accepted input, consumed by the next tick
    pub pending: PendingInput,
}

impl EntityState {
    /// Create a grounded, idle entity at `position`.
    pub fn new(id: EntityId, controller: PeerId, position: Vec3) -> Self {
        Self {
            id,
            controller,
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            grounded: true,
            pending: PendingInput::default(),
        }
    }
}

// =============================================================================
// WORLD
// =============================================================================

/// All entities simulated by the authoritative process.
#[derive(Debug, Default)]
pub struct World {
    entities: BTreeMap<EntityId, EntityState>,
    next_entity_id: u32,
    tick: u32,
}

impl World {
    /// Create an empty world.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_entity_id: 1,
            tick: 0,
        }
    }

    /// Spawn an entity for `controller` at its spawn point.
    pub fn spawn(&mut self, controller: PeerId) -> EntityId {
        let id = EntityId(self.next_entity_id.max(1));
        self.next_entity_id = id.0 + 1;
        let position = spawn_point(controller);
        self.entities.insert(id, EntityState::new(id, controller, position));
        id
    }

    /// Remove an entity. Returns its last state if it existed.
    pub fn despawn(&mut self, id: EntityId) -> Option<EntityState> {
        self.entities.remove(&id)
    }

    /// Get an entity.
    pub fn get(&self, id: EntityId) -> Option<&EntityState> {
        self.entities.get(&id)
    }

    /// Get an entity mutably.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityState> {
        self.entities.get_mut(&id)
    }

    /// Entity controlled by `peer`, if any.
    pub fn entity_of(&self, peer: PeerId) -> Option<EntityId> {
        self.entities
            .values()
            .find(|e| e.controller == peer)
            .map(|e| e.id)
    }

    /// Iterate entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.entities.values()
    }

    /// Iterate entities mutably in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EntityState> {
        self.entities.values_mut()
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if no entities exist.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Current simulation tick.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Advance the tick counter by one.
    pub fn advance_tick(&mut self) -> u32 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }
}

/// Spawn point for a peer: evenly spaced on a ring around the origin.
pub fn spawn_point(peer: PeerId) -> Vec3 {
    const SLOTS: u32 = 8;
    const RADIUS: f32 = 4.0;
    let slot = peer.get() % SLOTS;
    let angle = slot as f32 * std::f32::consts::TAU / SLOTS as f32;
    Vec3::new(angle.cos() * RADIUS, 0.0, angle.sin() * RADIUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_ordering() {
        let mut map = BTreeMap::new();
        map.insert(PeerId(9), "c");
        map.insert(PeerId(1), "a");
        map.insert(PeerId(2), "b");
        let order: Vec<_> = map.keys().copied().collect();
        assert_eq!(order, vec![PeerId(1), PeerId(2), PeerId(9)]);
    }

    #[test]
    fn test_peer_id_validity() {
        assert!(PeerId::HOST.is_host());
        assert!(!PeerId(0).is_valid());
        assert!(PeerId(7).is_valid());
    }

    #[test]
    fn test_spawn_assigns_increasing_ids() {
        let mut world = World::new();
        let a = world.spawn(PeerId(1));
        let b = world.spawn(PeerId(2));
        assert!(b > a);

        world.despawn(a);
        let c = world.spawn(PeerId(3));
        assert!(c > b, "ids are never reused");
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn test_entity_of_peer() {
        let mut world = World::new();
        let e = world.spawn(PeerId(7));
        assert_eq!(world.entity_of(PeerId(7)), Some(e));
        assert_eq!(world.entity_of(PeerId(9)), None);
    }

    #[test]
    fn test_new_entity_is_idle() {
        let mut world = World::new();
        let e = world.spawn(PeerId(4));
        let state = world.get(e).unwrap();
        assert!(state.grounded);
        assert_eq!(state.velocity, Vec3::ZERO);
        assert_eq!(state.pending, PendingInput::default());
    }
}
