//! Session State
//!
//! [`AuthoritySession`] is everything the authoritative process owns: the
//! entity world, the authority registry and the lobby ledger. It consumes
//! transport events one at a time and queues [`Outbound`] messages plus
//! [`SessionEvent`]s for the runner to flush.
//!
//! [`ClientSession`] is the observing side: a lobby mirror, replicated
//! entity views and the local input pipeline for the entity this peer
//! controls.
//!
//! Both are synchronous and own no sockets, so every rule here is testable
//! without a network.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::core::vec3::Vec3;
use crate::game::authority::{AuthorityRegistry, ControlPart};
use crate::game::events::SessionEvent;
use crate::game::facing::{apply_yaw_delta, FacingPredictor};
use crate::game::input::{validate_move, validate_yaw_delta, InputButtons, InputSampler, MoveValidation};
use crate::game::lobby::{sanitize_display_name, LobbyLedger, LobbyMirror, LobbyPlayer, LobbySnapshot, StartRejection};
use crate::game::state::{EntityId, PeerId, World};
use crate::game::tick::{simulate, FlatGround, Ground, MovementConfig, TickResult};
use crate::network::protocol::{
    ClientMessage, EntityStateUpdate, EntityStatesUpdate, MoveRequest, ServerMessage, WelcomeInfo,
};
use crate::network::transport::{Outbound, TransportError, TransportEvent};

// =============================================================================
// ERRORS / COMMANDS
// =============================================================================

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Listening or connecting failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No gameplay scene resource is configured.
    #[error("no gameplay scene configured")]
    MissingGameplayScene,

    /// The session is already in gameplay.
    #[error("game already started")]
    AlreadyStarted,

    /// The lobby refused the start request.
    #[error("start rejected: {0}")]
    StartRejected(#[from] StartRejection),

    /// No session is running.
    #[error("no active session")]
    NotRunning,
}

/// Requests from the local UI layer.
///
/// On a listen host these run as peer 1 against the authoritative state.
/// On a client they become requests to the authority.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Set the local player's ready flag.
    SetReady(bool),
    /// Ask to start the game.
    RequestStartGame,
    /// Button state for this frame.
    Input(InputButtons),
    /// Horizontal pointer motion for this frame.
    PointerMotion(f32),
    /// Rename the local player.
    SetDisplayName(String),
    /// Tear the session down.
    Shutdown,
}

// =============================================================================
// AUTHORITATIVE SESSION
// =============================================================================

/// Authoritative topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityRole {
    /// Peer 1 is also a player.
    ListenHost,
    /// Peer 1 never plays.
    Dedicated,
}

#[derive(Debug, Default)]
struct LocalPlayer {
    sampler: InputSampler,
    facing: FacingPredictor,
}

/// State owned by the authoritative process.
pub struct AuthoritySession {
    role: AuthorityRole,
    session_id: String,
    tick_rate: u32,
    gameplay_scene: Option<String>,
    movement: MovementConfig,
    ground: Box<dyn Ground + Send>,
    world: World,
    registry: AuthorityRegistry,
    lobby: LobbyLedger,
    connected: BTreeSet<PeerId>,
    in_gameplay: bool,
    local: LocalPlayer,
    outbox: Vec<Outbound>,
    events: Vec<SessionEvent>,
}

impl AuthoritySession {
    /// Create the authoritative state. A listen host immediately joins the
    /// lobby as peer 1 and gets an entity.
    pub fn new(role: AuthorityRole, config: &SessionConfig, session_id: impl Into<String>) -> Self {
        let mut session = Self {
            role,
            session_id: session_id.into(),
            tick_rate: config.tick_rate,
            gameplay_scene: config.gameplay_scene.clone(),
            movement: config.movement,
            ground: Box::new(FlatGround::default()),
            world: World::new(),
            registry: AuthorityRegistry::new(PeerId::HOST),
            lobby: LobbyLedger::new(PeerId::HOST),
            connected: BTreeSet::new(),
            in_gameplay: false,
            local: LocalPlayer {
                sampler: InputSampler::new(),
                facing: FacingPredictor::new(config.pointer_sensitivity),
            },
            outbox: Vec::new(),
            events: Vec::new(),
        };

        if role == AuthorityRole::ListenHost {
            session.join(PeerId::HOST);
        }
        session
    }

    /// Replace the ground the kinematic move lands on.
    pub fn with_ground(mut self, ground: impl Ground + Send + 'static) -> Self {
        self.ground = Box::new(ground);
        self
    }

    // -------------------------------------------------------------------------
    // Transport events
    // -------------------------------------------------------------------------

    /// Handle one transport event to completion.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected(peer) => self.on_peer_connected(peer),
            TransportEvent::PeerDisconnected(peer) => self.on_peer_disconnected(peer),
            TransportEvent::Message { from, msg } => self.handle_message(from, msg),
        }
    }

    /// A remote peer connected.
    pub fn on_peer_connected(&mut self, peer: PeerId) {
        if !peer.is_valid() || peer.is_host() {
            warn!(%peer, "Ignoring connection with a reserved peer id");
            return;
        }
        if self.connected.contains(&peer) {
            debug!(%peer, "Peer already connected");
            return;
        }
        info!(%peer, "Peer connected");

        self.outbox.push(Outbound::to(peer, ServerMessage::Welcome(WelcomeInfo {
            peer_id: peer,
            session_id: self.session_id.clone(),
            tick_rate: self.tick_rate,
        })));

        // Existing entities first, so the newcomer sees the full world.
        for state in self.world.iter() {
            self.outbox.push(Outbound::to(peer, ServerMessage::EntitySpawned(state.into())));
        }

        self.join(peer);

        if self.in_gameplay {
            if let Some(resource_id) = &self.gameplay_scene {
                debug!(%peer, "Late join, sending gameplay scene");
                self.outbox.push(Outbound::to(peer, ServerMessage::load_gameplay_scene(resource_id.clone())));
            }
        }
    }

    /// A remote peer disconnected.
    pub fn on_peer_disconnected(&mut self, peer: PeerId) {
        if !self.connected.remove(&peer) {
            debug!(%peer, "Disconnect for unknown peer ignored");
            return;
        }
        info!(%peer, "Peer disconnected");

        while let Some(entity) = self.world.entity_of(peer) {
            self.despawn_entity(entity);
        }
        if let Some(snapshot) = self.lobby.remove_player(peer) {
            self.push_lobby(&snapshot);
        }
        self.events.push(SessionEvent::PeerLeft { peer });
    }

    /// Handle a request. `sender` is the transport-resolved identity.
    pub fn handle_message(&mut self, sender: PeerId, msg: ClientMessage) {
        match msg {
            ClientMessage::RequestMove(request) => self.handle_move(sender, request),
            ClientMessage::RequestYawDelta { entity, yaw_delta } => {
                self.handle_yaw_delta(sender, entity, yaw_delta)
            }
            ClientMessage::RequestReadyState { ready } => self.set_ready(sender, ready),
            ClientMessage::RequestStartGame => {
                let _ = self.request_start_game(sender);
            }
            ClientMessage::RequestDisplayName { name } => self.set_display_name(sender, &name),
        }
    }

    fn handle_move(&mut self, sender: PeerId, request: MoveRequest) {
        if !self.registry.validate(request.entity, ControlPart::Input, sender) {
            return;
        }
        let input = match validate_move(request.direction, request.jump) {
            MoveValidation::DroppedNonFinite => {
                warn!(%sender, entity = %request.entity, "Dropping move request with non-finite direction");
                return;
            }
            validated => validated.accepted(),
        };
        if let (Some(input), Some(state)) = (input, self.world.get_mut(request.entity)) {
            // Last write wins until the next tick consumes it.
            state.pending = input;
        }
    }

    fn handle_yaw_delta(&mut self, sender: PeerId, entity: EntityId, yaw_delta: f32) {
        if !self.registry.validate(entity, ControlPart::Facing, sender) {
            return;
        }
        let Some(delta) = validate_yaw_delta(yaw_delta) else {
            warn!(%sender, %entity, "Dropping non-finite yaw delta");
            return;
        };
        if let Some(state) = self.world.get_mut(entity) {
            apply_yaw_delta(state, delta);
        }
    }

    fn set_ready(&mut self, sender: PeerId, ready: bool) {
        if let Some(snapshot) = self.lobby.set_ready(sender, ready) {
            debug!(%sender, ready, "Ready state changed");
            self.push_lobby(&snapshot);
        }
    }

    fn set_display_name(&mut self, sender: PeerId, raw: &str) {
        let name = match sanitize_display_name(raw) {
            Ok(name) => name,
            Err(e) => {
                warn!(%sender, "Rejected display name: {}", e);
                return;
            }
        };
        if let Some(snapshot) = self.lobby.set_display_name(sender, name) {
            self.push_lobby(&snapshot);
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start on behalf of `sender`: host only, start gate open.
    pub fn request_start_game(&mut self, sender: PeerId) -> Result<(), SessionError> {
        if let Err(rejection) = self.lobby.check_start(sender) {
            warn!(%sender, "Start request rejected: {}", rejection);
            return Err(rejection.into());
        }
        self.start_game()
    }

    /// Move every peer into gameplay.
    ///
    /// Transitions locally, tells every remote peer to load the gameplay
    /// scene and makes sure each connected player has an entity.
    pub fn start_game(&mut self) -> Result<(), SessionError> {
        let Some(resource_id) = self.gameplay_scene.clone() else {
            error!("No gameplay scene configured, not starting");
            return Err(SessionError::MissingGameplayScene);
        };
        if self.in_gameplay {
            warn!("Game already started");
            return Err(SessionError::AlreadyStarted);
        }

        info!(%resource_id, players = self.lobby.len(), "Starting game");
        self.in_gameplay = true;
        self.events.push(SessionEvent::scene_changed(resource_id.clone()));
        self.outbox.push(Outbound::broadcast(ServerMessage::load_gameplay_scene(resource_id)));

        let peers: Vec<PeerId> = self.connected.iter().copied().collect();
        for peer in peers {
            if self.world.entity_of(peer).is_none() {
                self.spawn_player(peer);
            }
        }
        Ok(())
    }

    /// Run one fixed tick and queue the resulting entity states.
    pub fn tick(&mut self, dt: f32) -> Option<TickResult> {
        if self.world.is_empty() {
            return None;
        }

        let result = simulate(&mut self.world, &self.movement, self.ground.as_ref(), dt);
        let entities = self.world.iter().map(EntityStateUpdate::from).collect();
        self.outbox.push(Outbound::broadcast(ServerMessage::EntityStates(EntityStatesUpdate {
            tick: result.tick,
            entities,
        })));
        Some(result)
    }

    /// Apply a command from the local UI layer as peer 1.
    pub fn apply_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetReady(ready) => {
                self.handle_message(PeerId::HOST, ClientMessage::RequestReadyState { ready })
            }
            SessionCommand::RequestStartGame => {
                let result = match self.role {
                    AuthorityRole::ListenHost => self.request_start_game(PeerId::HOST),
                    AuthorityRole::Dedicated => self.operator_start(),
                };
                if let Err(e) = result {
                    debug!("Local start request not applied: {}", e);
                }
            }
            SessionCommand::Input(buttons) => self.local_input(buttons),
            SessionCommand::PointerMotion(dx) => self.local_pointer_motion(dx),
            SessionCommand::SetDisplayName(name) => {
                self.handle_message(PeerId::HOST, ClientMessage::RequestDisplayName { name })
            }
            SessionCommand::Shutdown => {}
        }
    }

    /// The dedicated server has no host player; its operator may start once
    /// the gate is open.
    fn operator_start(&mut self) -> Result<(), SessionError> {
        if !self.lobby.can_start_game() {
            warn!("Start rejected: not every player is ready");
            return Err(StartRejection::NotAllReady.into());
        }
        self.start_game()
    }

    fn local_input(&mut self, buttons: InputButtons) {
        let Some(entity) = self.world.entity_of(PeerId::HOST) else {
            return;
        };
        if let Some(input) = self.local.sampler.sample_for_send(buttons) {
            let msg = ClientMessage::request_move(entity, input.direction, input.jump);
            self.handle_message(PeerId::HOST, msg);
        }
    }

    fn local_pointer_motion(&mut self, dx: f32) {
        let Some(entity) = self.world.entity_of(PeerId::HOST) else {
            return;
        };
        if let Some(yaw_delta) = self.local.facing.pointer_motion(dx) {
            self.handle_message(PeerId::HOST, ClientMessage::RequestYawDelta { entity, yaw_delta });
        }
    }

    // -------------------------------------------------------------------------
    // Spawning
    // -------------------------------------------------------------------------

    fn join(&mut self, peer: PeerId) {
        self.connected.insert(peer);
        self.spawn_player(peer);
        self.events.push(SessionEvent::PeerJoined { peer });
        if let Some(snapshot) = self.lobby.add_player(peer, peer.is_host()) {
            self.push_lobby(&snapshot);
        }
    }

    fn spawn_player(&mut self, peer: PeerId) -> Option<EntityId> {
        let entity = self.world.spawn(peer);
        if let Err(e) = self.registry.bind(entity, peer, &ControlPart::ALL) {
            error!(%peer, "Failed to bind spawned entity: {}", e);
            self.world.despawn(entity);
            return None;
        }

        let state = self.world.get(entity)?;
        info!(%peer, %entity, position = %state.position, "Spawned entity");
        self.outbox.push(Outbound::broadcast(ServerMessage::EntitySpawned(state.into())));
        if peer.is_host() {
            self.local.facing.seed(state.yaw);
            self.local.sampler.reset();
        }
        self.events.push(SessionEvent::entity_spawned(entity, peer));
        Some(entity)
    }

    fn despawn_entity(&mut self, entity: EntityId) {
        self.registry.unbind(entity);
        if self.world.despawn(entity).is_some() {
            info!(%entity, "Despawned entity");
            self.outbox.push(Outbound::broadcast(ServerMessage::EntityDespawned { entity }));
            self.events.push(SessionEvent::EntityDespawned { entity });
        }
    }

    fn push_lobby(&mut self, snapshot: &LobbySnapshot) {
        self.outbox.push(Outbound::broadcast(ServerMessage::lobby_snapshot(snapshot)));
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Topology.
    pub fn role(&self) -> AuthorityRole {
        self.role
    }

    /// Session identifier sent in welcomes.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest lobby snapshot.
    pub fn lobby_snapshot(&self) -> &LobbySnapshot {
        self.lobby.snapshot()
    }

    /// Entity world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Authority registry.
    pub fn registry(&self) -> &AuthorityRegistry {
        &self.registry
    }

    /// True once the gameplay scene was started.
    pub fn in_gameplay(&self) -> bool {
        self.in_gameplay
    }

    /// Connected players, including peer 1 on a listen host.
    pub fn connected_peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.connected.iter().copied()
    }

    /// Locally predicted yaw of the host player.
    pub fn local_predicted_yaw(&self) -> f32 {
        self.local.facing.predicted_yaw()
    }

    /// Take queued outbound messages.
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Take queued events.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }
}

// =============================================================================
// CLIENT SESSION
// =============================================================================

/// Replicated view of an entity on a client.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView {
    /// Entity id
    pub id: EntityId,
    /// Controlling peer
    pub controller: PeerId,
    /// Last replicated position
    pub position: Vec3,
    /// Last replicated velocity
    pub velocity: Vec3,
    /// Last authoritative yaw
    pub yaw: f32,
    /// Last grounded flag
    pub grounded: bool,
}

/// State held by a client process.
#[derive(Debug)]
pub struct ClientSession {
    local_peer: Option<PeerId>,
    session_id: Option<String>,
    mirror: LobbyMirror,
    entities: BTreeMap<EntityId, EntityView>,
    controlled: Option<EntityId>,
    sampler: InputSampler,
    facing: FacingPredictor,
    scene: Option<String>,
    last_tick: Option<u32>,
    outbox: Vec<ClientMessage>,
    events: Vec<SessionEvent>,
}

impl ClientSession {
    /// Create an unwelcomed client.
    pub fn new(pointer_sensitivity: f32) -> Self {
        Self {
            local_peer: None,
            session_id: None,
            mirror: LobbyMirror::new(),
            entities: BTreeMap::new(),
            controlled: None,
            sampler: InputSampler::new(),
            facing: FacingPredictor::new(pointer_sensitivity),
            scene: None,
            last_tick: None,
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Apply a message from the authority.
    pub fn handle_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Welcome(welcome) => {
                if !welcome.peer_id.is_valid() {
                    warn!("Ignoring welcome with reserved peer id 0");
                    return;
                }
                info!(peer = %welcome.peer_id, session = %welcome.session_id, "Welcomed");
                self.local_peer = Some(welcome.peer_id);
                self.session_id = Some(welcome.session_id);
                self.mirror.set_local_peer(welcome.peer_id);
                self.controlled = self
                    .entities
                    .values()
                    .find(|view| view.controller == welcome.peer_id)
                    .map(|view| view.id);
                self.events.push(SessionEvent::Established { local_peer: welcome.peer_id });
            }
            ServerMessage::PushLobbySnapshot { players } => {
                let snapshot = self.mirror.apply(players.into_iter().map(LobbyPlayer::from).collect());
                debug!(players = snapshot.len(), can_start = snapshot.can_start_game(), "Lobby updated");
            }
            ServerMessage::LoadGameplayScene { resource_id } => {
                info!(%resource_id, "Loading gameplay scene");
                self.scene = Some(resource_id.clone());
                self.events.push(SessionEvent::scene_changed(resource_id));
            }
            ServerMessage::EntitySpawned(spawn) => {
                let view = EntityView {
                    id: spawn.entity,
                    controller: spawn.controller,
                    position: Vec3::from_array(spawn.position),
                    velocity: Vec3::ZERO,
                    yaw: spawn.yaw,
                    grounded: true,
                };
                if Some(spawn.controller) == self.local_peer {
                    self.controlled = Some(spawn.entity);
                    self.facing.seed(spawn.yaw);
                    self.sampler.reset();
                }
                self.entities.insert(spawn.entity, view);
                self.events.push(SessionEvent::entity_spawned(spawn.entity, spawn.controller));
            }
            ServerMessage::EntityDespawned { entity } => {
                if self.entities.remove(&entity).is_some() {
                    self.events.push(SessionEvent::EntityDespawned { entity });
                }
                if self.controlled == Some(entity) {
                    self.controlled = None;
                    self.sampler.reset();
                }
            }
            ServerMessage::EntityStates(update) => {
                for state in update.entities {
                    match self.entities.get_mut(&state.entity) {
                        Some(view) => {
                            view.position = Vec3::from_array(state.position);
                            view.velocity = Vec3::from_array(state.velocity);
                            view.yaw = state.yaw;
                            view.grounded = state.grounded;
                        }
                        None => debug!(entity = %state.entity, "State for unknown entity skipped"),
                    }
                }
                self.last_tick = Some(update.tick);
            }
        }
    }

    /// The connection to the authority closed. Shadow state is discarded.
    pub fn on_disconnected(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "Disconnected from authority");
        self.mirror.clear();
        self.entities.clear();
        self.controlled = None;
        self.scene = None;
        self.last_tick = None;
        self.sampler.reset();
        self.events.push(SessionEvent::disconnected(reason));
    }

    /// Apply a command from the local UI layer.
    pub fn apply_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetReady(ready) => self.set_ready(ready),
            SessionCommand::RequestStartGame => self.request_start_game(),
            SessionCommand::Input(buttons) => self.sample_input(buttons),
            SessionCommand::PointerMotion(dx) => self.pointer_motion(dx),
            SessionCommand::SetDisplayName(name) => {
                self.outbox.push(ClientMessage::RequestDisplayName { name })
            }
            SessionCommand::Shutdown => {}
        }
    }

    /// Ask the authority to change the ready flag. The mirror only changes
    /// when the resulting snapshot arrives.
    pub fn set_ready(&mut self, ready: bool) {
        self.outbox.push(ClientMessage::RequestReadyState { ready });
    }

    /// Ask the authority to start. It rejects non-hosts.
    pub fn request_start_game(&mut self) {
        self.outbox.push(ClientMessage::RequestStartGame);
    }

    /// Sample buttons for the controlled entity.
    pub fn sample_input(&mut self, buttons: InputButtons) {
        let Some(entity) = self.controlled else {
            return;
        };
        if let Some(input) = self.sampler.sample_for_send(buttons) {
            self.outbox.push(ClientMessage::request_move(entity, input.direction, input.jump));
        }
    }

    /// Predict yaw locally and forward the delta.
    pub fn pointer_motion(&mut self, dx: f32) {
        let Some(entity) = self.controlled else {
            return;
        };
        if let Some(yaw_delta) = self.facing.pointer_motion(dx) {
            self.outbox.push(ClientMessage::RequestYawDelta { entity, yaw_delta });
        }
    }

    /// Peer id assigned by the authority.
    pub fn local_peer(&self) -> Option<PeerId> {
        self.local_peer
    }

    /// Session identifier from the welcome.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Snapshot computed from the mirror.
    pub fn lobby_snapshot(&self) -> &LobbySnapshot {
        self.mirror.snapshot()
    }

    /// Replicated entity views.
    pub fn entities(&self) -> impl Iterator<Item = &EntityView> {
        self.entities.values()
    }

    /// One entity view.
    pub fn entity(&self, id: EntityId) -> Option<&EntityView> {
        self.entities.get(&id)
    }

    /// Entity the local peer controls.
    pub fn controlled_entity(&self) -> Option<EntityId> {
        self.controlled
    }

    /// Locally predicted yaw of the controlled entity.
    pub fn predicted_yaw(&self) -> f32 {
        self.facing.predicted_yaw()
    }

    /// Gameplay scene, once loaded.
    pub fn scene(&self) -> Option<&str> {
        self.scene.as_deref()
    }

    /// Tick of the last applied entity states.
    pub fn last_tick(&self) -> Option<u32> {
        self.last_tick
    }

    /// Take queued requests.
    pub fn drain_outbox(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Take queued events.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }
}

// =============================================================================
// TESTS
// =============================================================================
