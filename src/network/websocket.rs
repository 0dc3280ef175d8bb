//! WebSocket Transport
//!
//! Listener side for the authoritative process and connector side for
//! clients. Each connection gets a reader loop and a writer task; the
//! writer drains an unbounded queue so sends from the simulation task never
//! block. Peer ids are handed out from [`PeerId::FIRST_REMOTE`] upwards and
//! never reused.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{accept_async_with_config, connect_async_with_config, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::PeerId;
use crate::network::protocol::{ClientMessage, ServerMessage, MAX_FRAME_BYTES};
use crate::network::transport::{
    LinkEvent, Outbound, Recipient, TransportError, TransportEvent, EVENT_QUEUE_CAPACITY,
};

type PeerLinks = Arc<RwLock<BTreeMap<PeerId, mpsc::UnboundedSender<Message>>>>;

/// Read limits enforced by tungstenite from the frame header, so an
/// oversized frame is refused before its payload is buffered.
fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_FRAME_BYTES),
        max_frame_size: Some(MAX_FRAME_BYTES),
        ..Default::default()
    }
}

/// Text payload of a frame, or `None` if it should be skipped.
fn frame_text(msg: Message) -> Option<Result<String, Message>> {
    match msg {
        Message::Text(text) => Some(Ok(text)),
        Message::Binary(data) => match String::from_utf8(data) {
            Ok(text) => Some(Ok(text)),
            Err(e) => {
                debug!("Dropping non-UTF-8 binary frame: {}", e);
                None
            }
        },
        other => Some(Err(other)),
    }
}

// =============================================================================
// LISTENER
// =============================================================================

/// Listening side of the transport.
pub struct WsServer {
    local_addr: SocketAddr,
    peers: PeerLinks,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl WsServer {
    /// Bind and start accepting peers. Events are delivered on the returned
    /// receiver in arrival order.
    #[instrument(skip_all, fields(%addr, max_peers = max_peers))]
    pub async fn listen(
        addr: SocketAddr,
        max_peers: usize,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        let peers: PeerLinks = Arc::new(RwLock::new(BTreeMap::new()));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            max_peers,
            peers.clone(),
            events_tx,
            shutdown_tx.clone(),
        ));

        Ok((
            Self {
                local_addr,
                peers,
                shutdown_tx,
                accept_task,
            },
            events_rx,
        ))
    }

    /// Address actually bound (useful when listening on port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a message. Unknown recipients are skipped.
    pub async fn deliver(&self, out: &Outbound) {
        let text = match out.msg.to_json() {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                return;
            }
        };

        let peers = self.peers.read().await;
        match out.recipient {
            Recipient::Peer(peer) => match peers.get(&peer) {
                Some(link) => {
                    let _ = link.send(Message::Text(text));
                }
                None => debug!(%peer, "Dropping message for unknown peer"),
            },
            Recipient::AllRemote => {
                for link in peers.values() {
                    let _ = link.send(Message::Text(text.clone()));
                }
            }
        }
    }

    /// Number of connected remote peers.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.accept_task.abort();
    }
}

impl Drop for WsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    max_peers: usize,
    peers: PeerLinks,
    events_tx: mpsc::Sender<TransportEvent>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut next_peer = PeerId::FIRST_REMOTE.get();
    // A slot is taken at accept time and held until the connection ends.
    let slots = Arc::new(Semaphore::new(max_peers.min(Semaphore::MAX_PERMITS)));

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let Ok(slot) = slots.clone().try_acquire_owned() else {
                            warn!("Peer limit {} reached, refusing {}", max_peers, addr);
                            continue;
                        };

                        let peer = PeerId(next_peer);
                        next_peer = next_peer.wrapping_add(1).max(PeerId::FIRST_REMOTE.get());
                        info!(%peer, "New connection from {}", addr);

                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            peer,
                            slot,
                            peers.clone(),
                            events_tx.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Listener shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peer: PeerId,
    _slot: OwnedSemaphorePermit,
    peers: PeerLinks,
    events_tx: mpsc::Sender<TransportEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let ws_stream = match accept_async_with_config(stream, Some(ws_config())).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (link_tx, mut link_rx) = mpsc::unbounded_channel::<Message>();

    // Registered before the event so the first reply has somewhere to go.
    peers.write().await.insert(peer, link_tx.clone());
    if events_tx.send(TransportEvent::PeerConnected(peer)).await.is_err() {
        peers.write().await.remove(&peer);
        return;
    }

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = link_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(%peer, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                let text = match frame_text(msg) {
                    Some(Ok(text)) => text,
                    Some(Err(Message::Close(_))) => {
                        debug!(%peer, "Peer closed connection");
                        break;
                    }
                    _ => continue,
                };

                if text.len() > MAX_FRAME_BYTES {
                    warn!(%peer, len = text.len(), "Dropping oversized frame");
                    continue;
                }

                match ClientMessage::from_json(&text) {
                    Ok(msg) => {
                        let event = TransportEvent::Message { from: peer, msg };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(%peer, "Invalid message: {}", e),
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = link_tx.send(Message::Close(None));
                break;
            }
        }
    }

    peers.write().await.remove(&peer);
    let _ = events_tx.send(TransportEvent::PeerDisconnected(peer)).await;

    // Let a queued close frame flush, then stop.
    drop(link_tx);
    let _ = tokio::time::timeout(std::time::Duration::from_millis(250), sender_task).await;
    info!(%peer, "Connection {} cleaned up", addr);
}

// =============================================================================
// CONNECTOR
// =============================================================================

/// Build the WebSocket URL for `address:port`.
pub fn ws_url(address: &str, port: u16) -> String {
    if address.parse::<std::net::Ipv6Addr>().is_ok() {
        format!("ws://[{}]:{}", address, port)
    } else {
        format!("ws://{}:{}", address, port)
    }
}

/// Client side of the transport: one connection to the authority.
pub struct ServerLink {
    outgoing: mpsc::UnboundedSender<Message>,
    events: mpsc::Receiver<LinkEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ServerLink {
    /// Connect to the authority at `address:port`.
    #[instrument(skip_all, fields(%address, port = port))]
    pub async fn connect(address: &str, port: u16) -> Result<Self, TransportError> {
        let url = ws_url(address, port);
        info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async_with_config(url.as_str(), Some(ws_config()), false).await?;
        info!("Connected to {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let reader = tokio::spawn(async move {
            let reason = loop {
                let msg = match read.next().await {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => break format!("read error: {}", e),
                    None => break "connection closed".to_string(),
                };

                let text = match frame_text(msg) {
                    Some(Ok(text)) => text,
                    Some(Err(Message::Close(_))) => break "server closed connection".to_string(),
                    _ => continue,
                };

                if text.len() > MAX_FRAME_BYTES {
                    warn!(len = text.len(), "Dropping oversized frame");
                    continue;
                }

                match ServerMessage::from_json(&text) {
                    Ok(msg) => {
                        if events_tx.send(LinkEvent::Message(msg)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Failed to parse server message: {}", e),
                }
            };
            let _ = events_tx.send(LinkEvent::Closed { reason }).await;
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        Ok(Self {
            outgoing,
            events,
            reader,
            writer,
        })
    }

    /// Queue a request for the authority.
    pub fn send(&self, msg: &ClientMessage) {
        match msg.to_json() {
            Ok(text) => {
                let _ = self.outgoing.send(Message::Text(text));
            }
            Err(e) => error!("Failed to serialize message: {}", e),
        }
    }

    /// Next inbound event. `None` once the reader has stopped.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Send a close frame and stop both tasks.
    pub async fn close(self) {
        let _ = self.outgoing.send(Message::Close(None));
        let _ = tokio::time::timeout(std::time::Duration::from_millis(250), self.writer).await;
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url("127.0.0.1", 7777), "ws://127.0.0.1:7777");
        assert_eq!(ws_url("::1", 9000), "ws://[::1]:9000");
        assert_eq!(ws_url("example.org", 80), "ws://example.org:80");
    }

    #[test]
    fn test_binary_frames_read_as_text() {
        let frame = Message::Binary(br#"{"type":"request_start_game"}"#.to_vec());
        let text = frame_text(frame).unwrap().unwrap();
        assert_eq!(ClientMessage::from_json(&text).unwrap(), ClientMessage::RequestStartGame);

        assert!(frame_text(Message::Binary(vec![0xff, 0xfe])).is_none());
    }

    #[tokio::test]
    async fn test_peer_ids_start_after_host() {
        let (server, mut events) = WsServer::listen("127.0.0.1:0".parse().unwrap(), 4)
            .await
            .unwrap();
        let port = server.local_addr().port();

        let mut link = ServerLink::connect("127.0.0.1", port).await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::PeerConnected(PeerId(2))));

        server
            .deliver(&Outbound::to(PeerId(2), ServerMessage::load_gameplay_scene("arena")))
            .await;
        assert_eq!(
            link.recv().await,
            Some(LinkEvent::Message(ServerMessage::load_gameplay_scene("arena")))
        );

        link.send(&ClientMessage::RequestStartGame);
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message { from: PeerId(2), msg: ClientMessage::RequestStartGame })
        );

        link.close().await;
        assert_eq!(events.recv().await, Some(TransportEvent::PeerDisconnected(PeerId(2))));
        assert_eq!(server.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_cap() {
        let (server, mut events) = WsServer::listen("127.0.0.1:0".parse().unwrap(), 1)
            .await
            .unwrap();
        let port = server.local_addr().port();

        let _first = ServerLink::connect("127.0.0.1", port).await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::PeerConnected(PeerId(2))));

        // Refused at accept: the handshake never completes.
        assert!(ServerLink::connect("127.0.0.1", port).await.is_err());
        assert_eq!(server.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_connection_cap_holds_for_simultaneous_connects() {
        let (server, mut events) = WsServer::listen("127.0.0.1:0".parse().unwrap(), 1)
            .await
            .unwrap();
        let port = server.local_addr().port();

        let attempts = futures_util::future::join_all(
            (0..4).map(|_| ServerLink::connect("127.0.0.1", port)),
        )
        .await;
        let links: Vec<ServerLink> = attempts.into_iter().filter_map(Result::ok).collect();
        assert_eq!(links.len(), 1);

        assert_eq!(events.recv().await, Some(TransportEvent::PeerConnected(PeerId(2))));
        assert_eq!(server.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (server, mut events) = WsServer::listen("127.0.0.1:0".parse().unwrap(), 4)
            .await
            .unwrap();
        let port = server.local_addr().port();

        // Plain client with default limits, so it will send the frame.
        let (mut ws, _) = tokio_tungstenite::connect_async(ws_url("127.0.0.1", port))
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::PeerConnected(PeerId(2))));

        let _ = ws.send(Message::Text("x".repeat(MAX_FRAME_BYTES * 2))).await;
        assert_eq!(events.recv().await, Some(TransportEvent::PeerDisconnected(PeerId(2))));
    }
}
