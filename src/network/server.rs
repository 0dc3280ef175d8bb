//! Session Manager
//!
//! Owns the transport lifecycle for one process (listen host, dedicated
//! server or client) and runs the single simulation task that drives the
//! session state. The UI layer talks to it through a [`SessionHandle`].
//!
//! ```text
//!  connection tasks ──TransportEvent──┐
//!  SessionHandle ─────SessionCommand──┼──> simulation task ──> WsServer::deliver
//!  tick interval ─────────────────────┘         │
//!                                               ├──> broadcast<SessionEvent>
//!                                               └──> watch<LobbySnapshot>
//! ```

use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{checked_port, parse_address, SessionConfig};
use crate::game::events::SessionEvent;
use crate::game::input::InputButtons;
use crate::game::lobby::LobbySnapshot;
use crate::network::session::{
    AuthorityRole, AuthoritySession, ClientSession, SessionCommand, SessionError,
};
use crate::network::transport::{LinkEvent, TransportEvent};
use crate::network::websocket::{ServerLink, WsServer};

/// Capacity of the session event broadcast channel.
pub const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Which role the running session has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Listen host: authoritative and peer 1 plays.
    Host,
    /// Dedicated server: authoritative only.
    Dedicated,
    /// Client of a remote authority.
    Client,
}

impl SessionRole {
    /// True for the roles that own the authoritative state.
    pub fn is_authority(self) -> bool {
        !matches!(self, Self::Client)
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    role: SessionRole,
    session_id: String,
    local_addr: Option<SocketAddr>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    lobby: watch::Receiver<LobbySnapshot>,
}

impl SessionHandle {
    /// Session role.
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Session id. On a client, empty until the welcome arrives.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Bound listen address (authoritative roles only).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Subscribe to session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Latest lobby snapshot, updated whenever it changes.
    pub fn lobby(&self) -> watch::Receiver<LobbySnapshot> {
        self.lobby.clone()
    }

    /// Submit a command. Fails once the session has stopped.
    pub fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::NotRunning)
    }

    /// Set the local player's ready flag.
    pub fn set_ready(&self, ready: bool) -> Result<(), SessionError> {
        self.send(SessionCommand::SetReady(ready))
    }

    /// Ask to start the game.
    pub fn request_start_game(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::RequestStartGame)
    }

    /// Submit this frame's buttons.
    pub fn input(&self, buttons: InputButtons) -> Result<(), SessionError> {
        self.send(SessionCommand::Input(buttons))
    }

    /// Submit this frame's horizontal pointer motion.
    pub fn pointer_motion(&self, dx: f32) -> Result<(), SessionError> {
        self.send(SessionCommand::PointerMotion(dx))
    }

    /// Rename the local player.
    pub fn set_display_name(&self, name: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SetDisplayName(name.into()))
    }

    /// Stop the session.
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }
}

// =============================================================================
// MANAGER
// =============================================================================

struct ActiveSession {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

/// Starts and stops the session for this process.
pub struct SessionManager {
    config: SessionConfig,
    active: Option<ActiveSession>,
}

impl SessionManager {
    /// Create a manager with no session running.
    pub fn new(config: SessionConfig) -> Self {
        Self { config, active: None }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle to the running session, if any.
    pub fn handle(&self) -> Option<&SessionHandle> {
        self.active.as_ref().map(|a| &a.handle)
    }

    /// Listen as a host that also plays as peer 1. Port 0 falls back to
    /// the default port.
    #[instrument(skip(self))]
    pub async fn start_host(&mut self, port: u16, max_peers: usize) -> Result<SessionHandle, SessionError> {
        let addr = SocketAddr::new(self.config.bind_ip, checked_port(port));
        self.start_authority(AuthorityRole::ListenHost, addr, max_peers).await
    }

    /// Listen as a dedicated server; peer 1 never plays. Port 0 falls back
    /// to the default port.
    #[instrument(skip(self))]
    pub async fn start_dedicated_server(
        &mut self,
        port: u16,
        max_peers: usize,
    ) -> Result<SessionHandle, SessionError> {
        let addr = SocketAddr::new(self.config.bind_ip, checked_port(port));
        self.start_authority(AuthorityRole::Dedicated, addr, max_peers).await
    }

    /// Listen as a host on exactly `addr`. Port 0 binds an ephemeral port,
    /// reported by [`SessionHandle::local_addr`].
    #[instrument(skip(self))]
    pub async fn start_host_at(&mut self, addr: SocketAddr, max_peers: usize) -> Result<SessionHandle, SessionError> {
        self.start_authority(AuthorityRole::ListenHost, addr, max_peers).await
    }

    /// Listen as a dedicated server on exactly `addr`.
    #[instrument(skip(self))]
    pub async fn start_dedicated_server_at(
        &mut self,
        addr: SocketAddr,
        max_peers: usize,
    ) -> Result<SessionHandle, SessionError> {
        self.start_authority(AuthorityRole::Dedicated, addr, max_peers).await
    }

    /// Connect to an authority. An unusable address falls back to
    /// `127.0.0.1` and port 0 to the default port.
    #[instrument(skip(self))]
    pub async fn start_client(&mut self, address: &str, port: u16) -> Result<SessionHandle, SessionError> {
        self.replace_active().await;

        let address = parse_address(address);
        let port = checked_port(port);
        let link = ServerLink::connect(&address, port).await.map_err(|e| {
            error!("Failed to connect to {}:{}: {}", address, port, e);
            SessionError::from(e)
        })?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (lobby_tx, lobby_rx) = watch::channel(LobbySnapshot::default());

        let session = ClientSession::new(self.config.pointer_sensitivity);
        let task = tokio::spawn(run_client(session, link, commands_rx, events_tx.clone(), lobby_tx));

        let handle = SessionHandle {
            role: SessionRole::Client,
            session_id: String::new(),
            local_addr: None,
            commands: commands_tx,
            events: events_tx,
            lobby: lobby_rx,
        };
        self.active = Some(ActiveSession { handle: handle.clone(), task });
        Ok(handle)
    }

    async fn start_authority(
        &mut self,
        role: AuthorityRole,
        addr: SocketAddr,
        max_peers: usize,
    ) -> Result<SessionHandle, SessionError> {
        self.replace_active().await;

        let (server, transport_rx) = WsServer::listen(addr, max_peers).await.map_err(|e| {
            error!("Failed to listen on {}: {}", addr, e);
            SessionError::from(e)
        })?;

        let session_id = Uuid::new_v4().to_string();
        let session = AuthoritySession::new(role, &self.config, session_id.clone());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (lobby_tx, lobby_rx) = watch::channel(session.lobby_snapshot().clone());

        let local_addr = server.local_addr();
        let session_role = match role {
            AuthorityRole::ListenHost => SessionRole::Host,
            AuthorityRole::Dedicated => SessionRole::Dedicated,
        };
        info!(%session_id, %local_addr, role = ?session_role, "Session started");

        let task = tokio::spawn(run_authority(
            session,
            server,
            transport_rx,
            commands_rx,
            events_tx.clone(),
            lobby_tx,
            self.config.tick_rate,
        ));

        let handle = SessionHandle {
            role: session_role,
            session_id,
            local_addr: Some(local_addr),
            commands: commands_tx,
            events: events_tx,
            lobby: lobby_rx,
        };
        self.active = Some(ActiveSession { handle: handle.clone(), task });
        Ok(handle)
    }

    /// Only one role per process: a second start replaces the first.
    async fn replace_active(&mut self) {
        if let Some(active) = self.active.take() {
            warn!(role = ?active.handle.role(), "Session already running, replacing it");
            active.handle.shutdown();
            let _ = active.task.await;
        }
    }

    /// Stop the running session and wait for its task.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.shutdown();
            let _ = active.task.await;
            info!("Session stopped");
        }
    }
}

// =============================================================================
// SIMULATION TASKS
// =============================================================================

fn publish(
    events: Vec<SessionEvent>,
    snapshot: &LobbySnapshot,
    events_tx: &broadcast::Sender<SessionEvent>,
    lobby_tx: &watch::Sender<LobbySnapshot>,
) {
    for event in events {
        // No subscribers is fine.
        let _ = events_tx.send(event);
    }
    lobby_tx.send_if_modified(|current| {
        if current == snapshot {
            false
        } else {
            *current = snapshot.clone();
            true
        }
    });
}

async fn run_authority(
    mut session: AuthoritySession,
    server: WsServer,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    mut commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
    lobby_tx: watch::Sender<LobbySnapshot>,
    tick_rate: u32,
) {
    let dt = 1.0 / tick_rate.max(1) as f32;
    let mut tick_interval = interval(Duration::from_secs_f32(dt));
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = transport_rx.recv() => match event {
                Some(event) => session.handle_event(event),
                None => {
                    warn!("Transport closed");
                    break;
                }
            },
            command = commands_rx.recv() => match command {
                Some(SessionCommand::Shutdown) | None => break,
                Some(command) => session.apply_command(command),
            },
            _ = tick_interval.tick() => {
                if let Some(result) = session.tick(dt) {
                    if result.jumps > 0 {
                        debug!(tick = result.tick, jumps = result.jumps, "Tick");
                    }
                }
            }
        }

        for out in session.drain_outbox() {
            server.deliver(&out).await;
        }
        publish(session.drain_events(), session.lobby_snapshot(), &events_tx, &lobby_tx);
    }

    server.shutdown();
    let _ = events_tx.send(SessionEvent::disconnected("session shut down"));
    info!(session_id = session.session_id(), "Authority stopped");
}

async fn run_client(
    mut session: ClientSession,
    mut link: ServerLink,
    mut commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
    lobby_tx: watch::Sender<LobbySnapshot>,
) {
    let (reason, local) = loop {
        tokio::select! {
            event = link.recv() => match event {
                Some(LinkEvent::Message(msg)) => session.handle_message(msg),
                Some(LinkEvent::Closed { reason }) => break (reason, false),
                None => break ("connection lost".to_string(), false),
            },
            command = commands_rx.recv() => match command {
                Some(SessionCommand::Shutdown) | None => break ("local shutdown".to_string(), true),
                Some(command) => session.apply_command(command),
            },
        }

        for msg in session.drain_outbox() {
            link.send(&msg);
        }
        publish(session.drain_events(), session.lobby_snapshot(), &events_tx, &lobby_tx);
    };

    if local {
        link.close().await;
    }
    session.on_disconnected(reason);
    publish(session.drain_events(), session.lobby_snapshot(), &events_tx, &lobby_tx);
}
