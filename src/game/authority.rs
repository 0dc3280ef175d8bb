//! Authority Registry
//!
//! Records which peer may originate mutating requests for each entity.
//!
//! Every entity has an implicit whole-entity binding held by the
//! authoritative process (simulation and hit-relevant state) plus one
//! controlling-peer binding per declared [`ControlPart`]. The controller is
//! fixed at spawn and never changes while the entity lives.
//!
//! Validation only ever compares against the sender identity resolved by the
//! transport. Requests carry no identity field to compare against.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::warn;

use crate::game::state::{EntityId, PeerId};

/// Sub-component of an entity whose requests a client may originate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPart {
    /// Movement direction and jump.
    Input,
    /// Yaw deltas from pointer motion.
    Facing,
}

impl ControlPart {
    /// Every part a spawned player entity hands to its controller.
    pub const ALL: [ControlPart; 2] = [ControlPart::Input, ControlPart::Facing];
}

/// What a binding grants authority over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthorityScope {
    /// The whole entity. Always the authoritative process.
    Entity,
    /// A named sub-component granted to the controlling peer.
    Part(ControlPart),
}

/// One entry of the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthorityBinding {
    /// Bound entity
    pub entity: EntityId,
    /// Peer allowed to mutate within `scope`
    pub controlling_peer: PeerId,
    /// Extent of the grant
    pub scope: AuthorityScope,
}

/// Registry errors. All of them indicate a programming error in the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// The entity was already bound. Entities are spawned once.
    #[error("entity {0} is already bound")]
    AlreadyBound(EntityId),

    /// The same part was listed twice in one bind call.
    #[error("entity {entity} lists part {part:?} more than once")]
    DuplicatePart {
        /// Entity being bound
        entity: EntityId,
        /// Repeated part
        part: ControlPart,
    },
}

#[derive(Debug, Clone)]
struct EntityAuthority {
    controller: PeerId,
    parts: BTreeMap<ControlPart, PeerId>,
}

/// Maps entities (and their parts) to controlling peers.
///
/// Lives only on the authoritative process.
#[derive(Debug, Clone)]
pub struct AuthorityRegistry {
    /// Peer id of the process owning this registry.
    authority: PeerId,
    entries: BTreeMap<EntityId, EntityAuthority>,
}

impl AuthorityRegistry {
    /// Create an empty registry owned by `authority`.
    pub fn new(authority: PeerId) -> Self {
        Self {
            authority,
            entries: BTreeMap::new(),
        }
    }

    /// Bind `entity` with `controlling_peer` as controller of `parts`.
    ///
    /// The whole-entity binding is implicitly the authoritative process.
    pub fn bind(
        &mut self,
        entity: EntityId,
        controlling_peer: PeerId,
        parts: &[ControlPart],
    ) -> Result<(), AuthorityError> {
        if self.entries.contains_key(&entity) {
            return Err(AuthorityError::AlreadyBound(entity));
        }

        let mut bound = BTreeMap::new();
        for part in parts {
            if bound.insert(*part, controlling_peer).is_some() {
                return Err(AuthorityError::DuplicatePart { entity, part: *part });
            }
        }

        self.entries.insert(entity, EntityAuthority {
            controller: controlling_peer,
            parts: bound,
        });
        Ok(())
    }

    /// Remove every binding of `entity`. Returns true if it was bound.
    pub fn unbind(&mut self, entity: EntityId) -> bool {
        self.entries.remove(&entity).is_some()
    }

    /// Check that `sender` may mutate `part` of `entity`.
    ///
    /// `sender` must be the transport-resolved identity. Failures are logged
    /// and the caller drops the request.
    pub fn validate(&self, entity: EntityId, part: ControlPart, sender: PeerId) -> bool {
        match self.controller_of_part(entity, part) {
            Some(controller) if controller == sender => true,
            Some(controller) => {
                warn!(
                    %entity, ?part, %sender, %controller,
                    "Rejected request: sender does not control entity"
                );
                false
            }
            None => {
                warn!(%entity, ?part, %sender, "Rejected request: entity part is not bound");
                false
            }
        }
    }

    /// Controlling peer of the entity, if bound.
    pub fn controller_of(&self, entity: EntityId) -> Option<PeerId> {
        self.entries.get(&entity).map(|e| e.controller)
    }

    /// Controlling peer of one part, if that part is bound.
    pub fn controller_of_part(&self, entity: EntityId, part: ControlPart) -> Option<PeerId> {
        self.entries.get(&entity)?.parts.get(&part).copied()
    }

    /// All bindings of an entity, whole-entity binding first.
    pub fn bindings(&self, entity: EntityId) -> Vec<AuthorityBinding> {
        let Some(entry) = self.entries.get(&entity) else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(entry.parts.len() + 1);
        out.push(AuthorityBinding {
            entity,
            controlling_peer: self.authority,
            scope: AuthorityScope::Entity,
        });
        out.extend(entry.parts.iter().map(|(part, peer)| AuthorityBinding {
            entity,
            controlling_peer: *peer,
            scope: AuthorityScope::Part(*part),
        }));
        out
    }

    /// True if `entity` is bound.
    pub fn is_bound(&self, entity: EntityId) -> bool {
        self.entries.contains_key(&entity)
    }

    /// Number of bound entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AuthorityRegistry {
        AuthorityRegistry::new(PeerId::HOST)
    }

    #[test]
    fn test_bind_and_validate() {
        let mut reg = registry();
        reg.bind(EntityId(1), PeerId(7), &ControlPart::ALL).unwrap();

        assert!(reg.validate(EntityId(1), ControlPart::Input, PeerId(7)));
        assert!(reg.validate(EntityId(1), ControlPart::Facing, PeerId(7)));
        assert!(!reg.validate(EntityId(1), ControlPart::Input, PeerId(9)));
    }

    #[test]
    fn test_host_cannot_drive_client_entity() {
        let mut reg = registry();
        reg.bind(EntityId(1), PeerId(3), &ControlPart::ALL).unwrap();

        // The authoritative process owns the entity but not its input part.
        assert!(!reg.validate(EntityId(1), ControlPart::Input, PeerId::HOST));
    }

    #[test]
    fn test_rebind_rejected() {
        let mut reg = registry();
        reg.bind(EntityId(1), PeerId(2), &ControlPart::ALL).unwrap();
        let err = reg.bind(EntityId(1), PeerId(3), &ControlPart::ALL).unwrap_err();
        assert_eq!(err, AuthorityError::AlreadyBound(EntityId(1)));

        // Original controller untouched.
        assert_eq!(reg.controller_of(EntityId(1)), Some(PeerId(2)));
    }

    #[test]
    fn test_duplicate_part_rejected() {
        let mut reg = registry();
        let err = reg
            .bind(EntityId(4), PeerId(2), &[ControlPart::Input, ControlPart::Input])
            .unwrap_err();
        assert!(matches!(err, AuthorityError::DuplicatePart { .. }));
        assert!(!reg.is_bound(EntityId(4)));
    }

    #[test]
    fn test_unbound_part_rejected() {
        let mut reg = registry();
        reg.bind(EntityId(1), PeerId(2), &[ControlPart::Input]).unwrap();
        assert!(reg.validate(EntityId(1), ControlPart::Input, PeerId(2)));
        assert!(!reg.validate(EntityId(1), ControlPart::Facing, PeerId(2)));
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let reg = registry();
        assert!(!reg.validate(EntityId(42), ControlPart::Input, PeerId(2)));
    }

    #[test]
    fn test_unbind_removes_everything() {
        let mut reg = registry();
        reg.bind(EntityId(1), PeerId(2), &ControlPart::ALL).unwrap();
        assert!(reg.unbind(EntityId(1)));
        assert!(!reg.unbind(EntityId(1)));
        assert!(reg.bindings(EntityId(1)).is_empty());
        assert!(!reg.validate(EntityId(1), ControlPart::Input, PeerId(2)));
    }

    #[test]
    fn test_bindings_include_implicit_entity_scope() {
        let mut reg = registry();
        reg.bind(EntityId(5), PeerId(8), &ControlPart::ALL).unwrap();

        let bindings = reg.bindings(EntityId(5));
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].scope, AuthorityScope::Entity);
        assert_eq!(bindings[0].controlling_peer, PeerId::HOST);
        assert!(bindings[1..].iter().all(|b| b.controlling_peer == PeerId(8)));
    }
}
