//! Lobby State Machine
//!
//! The authoritative process owns a [`LobbyLedger`] keyed by peer id. Every
//! membership or readiness change rebuilds an immutable [`LobbySnapshot`]
//! which the session pushes, in full, to every peer. Receivers keep a
//! [`LobbyMirror`]: a private shadow ledger replaced wholesale from each
//! pushed list, never merged and never aliased with the sender's ledger.
//!
//! States are implicit in the ledger: empty, populated with someone not
//! ready, and populated with everyone ready (start gate open).

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::game::state::PeerId;

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 24;

// =============================================================================
// PLAYER / SNAPSHOT
// =============================================================================

/// One lobby member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyPlayer {
    /// Peer identifier (ledger key)
    pub peer_id: PeerId,
    /// Name shown in lobby lists
    pub display_name: String,
    /// Ready to start
    pub is_ready: bool,
    /// The peer that established the session. Fixed at creation.
    pub is_host: bool,
}

impl LobbyPlayer {
    /// New, not-ready member with the default name.
    pub fn new(peer_id: PeerId, is_host: bool) -> Self {
        Self {
            peer_id,
            display_name: default_display_name(peer_id),
            is_ready: false,
            is_host,
        }
    }
}

/// Default name for a peer.
pub fn default_display_name(peer_id: PeerId) -> String {
    format!("Player {}", peer_id)
}

/// Start gate: at least one player and everyone ready.
pub fn start_gate_open<'a, I>(players: I) -> bool
where
    I: IntoIterator<Item = &'a LobbyPlayer>,
{
    let mut any = false;
    for player in players {
        if !player.is_ready {
            return false;
        }
        any = true;
    }
    any
}

/// Immutable read projection of the lobby for one process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LobbySnapshot {
    players: Vec<LobbyPlayer>,
    local_is_host: bool,
    local_is_ready: bool,
    can_start_game: bool,
}

impl LobbySnapshot {
    /// Build from an ordered player list as seen by `local`.
    pub fn build(players: Vec<LobbyPlayer>, local: Option<PeerId>) -> Self {
        let local_entry = local.and_then(|peer| players.iter().find(|p| p.peer_id == peer));
        let local_is_host = local_entry.is_some_and(|p| p.is_host);
        let local_is_ready = local_entry.is_some_and(|p| p.is_ready);
        let can_start_game = start_gate_open(&players);

        Self {
            players,
            local_is_host,
            local_is_ready,
            can_start_game,
        }
    }

    /// Players ordered by peer id.
    pub fn players(&self) -> &[LobbyPlayer] {
        &self.players
    }

    /// Look up a player.
    pub fn player(&self, peer: PeerId) -> Option<&LobbyPlayer> {
        self.players.iter().find(|p| p.peer_id == peer)
    }

    /// The local process is the host player.
    pub fn local_is_host(&self) -> bool {
        self.local_is_host
    }

    /// The local player is ready.
    pub fn local_is_ready(&self) -> bool {
        self.local_is_ready
    }

    /// Start gate state.
    pub fn can_start_game(&self) -> bool {
        self.can_start_game
    }

    /// Number of players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// True if nobody is in the lobby.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

// =============================================================================
// AUTHORITATIVE LEDGER
// =============================================================================

/// Why a start request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartRejection {
    /// Requester is not in the lobby.
    #[error("peer {0} is not in the lobby")]
    UnknownPeer(PeerId),
    /// Only the host may start the game.
    #[error("peer {0} is not the host")]
    NotHost(PeerId),
    /// Start gate closed.
    #[error("not every player is ready")]
    NotAllReady,
}

/// Why a display name was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameRejection {
    /// Empty after trimming.
    #[error("display name is empty")]
    Empty,
    /// Longer than [`MAX_DISPLAY_NAME_CHARS`].
    #[error("display name exceeds {} characters", MAX_DISPLAY_NAME_CHARS)]
    TooLong,
    /// Contains control characters.
    #[error("display name contains control characters")]
    ControlCharacters,
}

/// Trim and check a requested display name.
pub fn sanitize_display_name(raw: &str) -> Result<String, NameRejection> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(NameRejection::Empty);
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(NameRejection::TooLong);
    }
    if name.chars().any(char::is_control) {
        return Err(NameRejection::ControlCharacters);
    }
    Ok(name.to_string())
}

/// Authoritative membership and readiness ledger.
///
/// Mutators return the rebuilt snapshot when something changed; the caller
/// broadcasts it. `None` means no change and nothing to broadcast.
#[derive(Debug, Clone)]
pub struct LobbyLedger {
    local_peer: PeerId,
    players: BTreeMap<PeerId, LobbyPlayer>,
    snapshot: LobbySnapshot,
}

impl LobbyLedger {
    /// Create an empty ledger on the authoritative process `local_peer`.
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            players: BTreeMap::new(),
            snapshot: LobbySnapshot::default(),
        }
    }

    /// Insert a new, not-ready player. No-op if already present.
    pub fn add_player(&mut self, peer: PeerId, is_host: bool) -> Option<LobbySnapshot> {
        if self.players.contains_key(&peer) {
            debug!(%peer, "Player already in lobby");
            return None;
        }
        self.players.insert(peer, LobbyPlayer::new(peer, is_host));
        Some(self.rebuild())
    }

    /// Remove a player. No-op (no rebuild) if absent.
    pub fn remove_player(&mut self, peer: PeerId) -> Option<LobbySnapshot> {
        self.players.remove(&peer)?;
        Some(self.rebuild())
    }

    /// Set a player's ready flag. No-op for unknown peers or unchanged flags.
    pub fn set_ready(&mut self, peer: PeerId, ready: bool) -> Option<LobbySnapshot> {
        let Some(player) = self.players.get_mut(&peer) else {
            debug!(%peer, "Ready change for unknown peer ignored");
            return None;
        };
        if player.is_ready == ready {
            return None;
        }
        player.is_ready = ready;
        Some(self.rebuild())
    }

    /// Rename a player. The name must already be sanitized.
    pub fn set_display_name(&mut self, peer: PeerId, name: String) -> Option<LobbySnapshot> {
        let player = self.players.get_mut(&peer)?;
        if player.display_name == name {
            return None;
        }
        player.display_name = name;
        Some(self.rebuild())
    }

    /// Check whether `requester` may start the game now.
    ///
    /// Host authorization is checked before the start gate.
    pub fn check_start(&self, requester: PeerId) -> Result<(), StartRejection> {
        let player = self
            .players
            .get(&requester)
            .ok_or(StartRejection::UnknownPeer(requester))?;
        if !player.is_host {
            return Err(StartRejection::NotHost(requester));
        }
        if !self.snapshot.can_start_game() {
            return Err(StartRejection::NotAllReady);
        }
        Ok(())
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> &LobbySnapshot {
        &self.snapshot
    }

    /// Start gate on the current ledger.
    pub fn can_start_game(&self) -> bool {
        self.snapshot.can_start_game()
    }

    /// Look up a ledger entry.
    pub fn player(&self, peer: PeerId) -> Option<&LobbyPlayer> {
        self.players.get(&peer)
    }

    /// True if `peer` is in the lobby.
    pub fn contains(&self, peer: PeerId) -> bool {
        self.players.contains_key(&peer)
    }

    /// Number of players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// True if nobody is in the lobby.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn rebuild(&mut self) -> LobbySnapshot {
        // Copies, never references into the ledger.
        let players: Vec<LobbyPlayer> = self.players.values().cloned().collect();
        self.snapshot = LobbySnapshot::build(players, Some(self.local_peer));
        self.snapshot.clone()
    }
}

// =============================================================================
// RECEIVER MIRROR
// =============================================================================

/// Shadow ledger on a non-authoritative process.
///
/// Only ever replaced from a pushed list. Local code never mutates it.
#[derive(Debug, Clone, Default)]
pub struct LobbyMirror {
    local_peer: Option<PeerId>,
    players: BTreeMap<PeerId, LobbyPlayer>,
    snapshot: LobbySnapshot,
}

impl LobbyMirror {
    /// Create an empty mirror; the local peer id arrives with the welcome.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the local peer id and recompute local fields.
    pub fn set_local_peer(&mut self, peer: PeerId) -> &LobbySnapshot {
        self.local_peer = Some(peer);
        self.recompute()
    }

    /// Replace the whole shadow ledger from a pushed list.
    ///
    /// Entries with peer id 0 or a repeated peer id are skipped with a
    /// warning; the rest are kept.
    pub fn apply(&mut self, entries: Vec<LobbyPlayer>) -> &LobbySnapshot {
        let mut fresh = BTreeMap::new();
        for entry in entries {
            if !entry.peer_id.is_valid() {
                warn!("Skipping lobby entry with reserved peer id 0");
                continue;
            }
            if fresh.contains_key(&entry.peer_id) {
                warn!(peer = %entry.peer_id, "Skipping duplicate lobby entry");
                continue;
            }
            fresh.insert(entry.peer_id, entry);
        }
        self.players = fresh;
        self.recompute()
    }

    /// Forget everything (e.g. after losing the server).
    pub fn clear(&mut self) {
        self.players.clear();
        self.snapshot = LobbySnapshot::build(Vec::new(), self.local_peer);
    }

    /// Latest locally computed snapshot.
    pub fn snapshot(&self) -> &LobbySnapshot {
        &self.snapshot
    }

    /// Local peer id, once welcomed.
    pub fn local_peer(&self) -> Option<PeerId> {
        self.local_peer
    }

    fn recompute(&mut self) -> &LobbySnapshot {
        let players: Vec<LobbyPlayer> = self.players.values().cloned().collect();
        self.snapshot = LobbySnapshot::build(players, self.local_peer);
        &self.snapshot
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn host_ledger() -> LobbyLedger {
        LobbyLedger::new(PeerId::HOST)
    }

    #[test]
    fn test_empty_lobby_cannot_start() {
        let ledger = host_ledger();
        assert!(!ledger.can_start_game());
        assert!(ledger.snapshot().is_empty());
    }

    #[test]
    fn test_ready_scenario() {
        let mut ledger = host_ledger();
        ledger.add_player(PeerId(1), true);
        ledger.add_player(PeerId(2), false);
        ledger.set_ready(PeerId(1), true);

        let snap = ledger.snapshot();
        assert_eq!(snap.players()[0].display_name, "Player 1");
        assert_eq!(snap.players()[1].display_name, "Player 2");
        assert!(!snap.can_start_game());

        let snap = ledger.set_ready(PeerId(2), true).unwrap();
        assert!(snap.can_start_game());
        assert!(snap.players().iter().all(|p| p.is_ready));

        assert_eq!(ledger.check_start(PeerId(1)), Ok(()));
        assert_eq!(ledger.check_start(PeerId(2)), Err(StartRejection::NotHost(PeerId(2))));
    }

    #[test]
    fn test_host_start_rejected_when_not_ready() {
        let mut ledger = host_ledger();
        ledger.add_player(PeerId(1), true);
        ledger.add_player(PeerId(2), false);
        ledger.set_ready(PeerId(1), true);
        assert_eq!(ledger.check_start(PeerId(1)), Err(StartRejection::NotAllReady));
    }

    #[test]
    fn test_unknown_requester_rejected() {
        let mut ledger = host_ledger();
        ledger.add_player(PeerId(1), true);
        assert_eq!(ledger.check_start(PeerId(5)), Err(StartRejection::UnknownPeer(PeerId(5))));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut ledger = host_ledger();
        ledger.add_player(PeerId(3), false);
        assert!(ledger.remove_player(PeerId(9)).is_none());
        assert!(ledger.remove_player(PeerId(3)).is_some());
        assert!(ledger.remove_player(PeerId(3)).is_none());
    }

    #[test]
    fn test_add_twice_is_noop() {
        let mut ledger = host_ledger();
        assert!(ledger.add_player(PeerId(3), false).is_some());
        ledger.set_ready(PeerId(3), true);
        assert!(ledger.add_player(PeerId(3), false).is_none());
        assert!(ledger.player(PeerId(3)).unwrap().is_ready, "existing entry untouched");
    }

    #[test]
    fn test_set_ready_unknown_or_unchanged() {
        let mut ledger = host_ledger();
        assert!(ledger.set_ready(PeerId(4), true).is_none());
        ledger.add_player(PeerId(4), false);
        assert!(ledger.set_ready(PeerId(4), false).is_none());
        assert!(ledger.set_ready(PeerId(4), true).is_some());
    }

    #[test]
    fn test_local_fields_on_authority() {
        let mut ledger = host_ledger();
        ledger.add_player(PeerId(1), true);
        let snap = ledger.set_ready(PeerId(1), true).unwrap();
        assert!(snap.local_is_host());
        assert!(snap.local_is_ready());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut ledger = host_ledger();
        ledger.add_player(PeerId(2), false);
        let mut snap = ledger.snapshot().clone();
        let before = ledger.snapshot().clone();

        // Mutating a received copy never feeds back.
        snap.players[0].is_ready = true;
        assert_eq!(ledger.snapshot(), &before);
        assert!(!ledger.player(PeerId(2)).unwrap().is_ready);
    }

    #[test]
    fn test_display_name_sanitizing() {
        assert_eq!(sanitize_display_name("  Ada  ").unwrap(), "Ada");
        assert_eq!(sanitize_display_name("   "), Err(NameRejection::Empty));
        assert_eq!(sanitize_display_name(&"x".repeat(25)), Err(NameRejection::TooLong));
        assert_eq!(sanitize_display_name("a\u{7}b"), Err(NameRejection::ControlCharacters));
    }

    #[test]
    fn test_rename_rebuilds() {
        let mut ledger = host_ledger();
        ledger.add_player(PeerId(2), false);
        let snap = ledger.set_display_name(PeerId(2), "Ada".into()).unwrap();
        assert_eq!(snap.player(PeerId(2)).unwrap().display_name, "Ada");
        assert!(ledger.set_display_name(PeerId(2), "Ada".into()).is_none());
        assert!(ledger.set_display_name(PeerId(9), "Bob".into()).is_none());
    }

    #[test]
    fn test_mirror_replaces_wholesale() {
        let mut mirror = LobbyMirror::new();
        mirror.set_local_peer(PeerId(2));
        mirror.apply(vec![LobbyPlayer::new(PeerId(1), true), LobbyPlayer::new(PeerId(2), false)]);
        assert_eq!(mirror.snapshot().len(), 2);

        let mut me = LobbyPlayer::new(PeerId(2), false);
        me.is_ready = true;
        let snap = mirror.apply(vec![me]);
        assert_eq!(snap.len(), 1, "no merge with the previous list");
        assert!(snap.local_is_ready());
        assert!(!snap.local_is_host());
        assert!(snap.can_start_game());
    }

    #[test]
    fn test_mirror_skips_malformed_entries() {
        let mut mirror = LobbyMirror::new();
        let snap = mirror.apply(vec![
            LobbyPlayer::new(PeerId(0), false),
            LobbyPlayer::new(PeerId(3), false),
            LobbyPlayer::new(PeerId(3), true),
            LobbyPlayer::new(PeerId(1), true),
        ]);
        let ids: Vec<_> = snap.players().iter().map(|p| p.peer_id).collect();
        assert_eq!(ids, vec![PeerId(1), PeerId(3)]);
        assert!(!snap.player(PeerId(3)).unwrap().is_host, "first entry wins");
    }

    #[test]
    fn test_mirror_local_fields_before_welcome() {
        let mut mirror = LobbyMirror::new();
        let snap = mirror.apply(vec![LobbyPlayer::new(PeerId(1), true)]);
        assert!(!snap.local_is_host());

        let snap = mirror.set_local_peer(PeerId(1));
        assert!(snap.local_is_host());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u32),
        Remove(u32),
        Ready(u32, bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..8).prop_map(Op::Add),
            (1u32..8).prop_map(Op::Remove),
            (1u32..8, any::<bool>()).prop_map(|(p, r)| Op::Ready(p, r)),
        ]
    }

    proptest! {
        #[test]
        fn prop_start_gate_matches_ledger(ops in proptest::collection::vec(op(), 0..64)) {
            let mut ledger = host_ledger();
            for op in ops {
                match op {
                    Op::Add(p) => { ledger.add_player(PeerId(p), p == 1); }
                    Op::Remove(p) => { ledger.remove_player(PeerId(p)); }
                    Op::Ready(p, r) => { ledger.set_ready(PeerId(p), r); }
                }
                let expected = !ledger.is_empty()
                    && ledger.snapshot().players().iter().all(|p| p.is_ready);
                prop_assert_eq!(ledger.can_start_game(), expected);
                prop_assert_eq!(ledger.snapshot().len(), ledger.len());
            }
        }
    }
}
