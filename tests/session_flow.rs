//! End-to-end lobby flow over a real localhost WebSocket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use lobby_authority::{LobbySnapshot, SessionConfig, SessionEvent, SessionManager};

const WAIT: Duration = Duration::from_secs(5);

fn local_config() -> SessionConfig {
    SessionConfig {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ..Default::default()
    }
}

fn ephemeral() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

async fn wait_lobby<F>(rx: &mut watch::Receiver<LobbySnapshot>, pred: F) -> LobbySnapshot
where
    F: FnMut(&LobbySnapshot) -> bool,
{
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for lobby")
        .expect("lobby channel closed")
        .clone()
}

async fn wait_event<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_host_and_client_ready_up_and_start() {
    let mut host = SessionManager::new(local_config());
    let host_handle = host.start_host_at(ephemeral(), 4).await.unwrap();
    let port = host_handle.local_addr().unwrap().port();
    let mut host_lobby = host_handle.lobby();

    let mut client = SessionManager::new(local_config());
    let client_handle = client.start_client("127.0.0.1", port).await.unwrap();
    let mut client_events = client_handle.subscribe();
    let mut client_lobby = client_handle.lobby();

    // Both sides see host + client, nobody ready.
    let snap = wait_lobby(&mut host_lobby, |s| s.len() == 2).await;
    assert!(snap.local_is_host());
    assert!(!snap.can_start_game());

    let snap = wait_lobby(&mut client_lobby, |s| s.len() == 2).await;
    assert!(!snap.local_is_host());
    assert_eq!(snap.players()[0].display_name, "Player 1");
    assert!(snap.players()[0].is_host);
    assert_eq!(snap.players()[1].display_name, "Player 2");

    host_handle.set_ready(true).unwrap();
    client_handle.set_ready(true).unwrap();
    client_handle.set_display_name("Ada").unwrap();

    let snap = wait_lobby(&mut client_lobby, |s| {
        s.can_start_game() && s.player(lobby_authority::PeerId(2)).is_some_and(|p| p.display_name == "Ada")
    })
    .await;
    assert!(snap.local_is_ready());
    wait_lobby(&mut host_lobby, |s| s.can_start_game()).await;

    host_handle.request_start_game().unwrap();
    let event = wait_event(&mut client_events, |e| matches!(e, SessionEvent::SceneChanged { .. })).await;
    assert_eq!(event, SessionEvent::scene_changed("arena"));

    // Losing the authority clears the client's shadow state.
    host.shutdown().await;
    wait_event(&mut client_events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    wait_lobby(&mut client_lobby, |s| s.is_empty()).await;

    client.shutdown().await;
}

#[tokio::test]
async fn test_client_cannot_start_game() {
    let mut host = SessionManager::new(local_config());
    let host_handle = host.start_host_at(ephemeral(), 4).await.unwrap();
    let port = host_handle.local_addr().unwrap().port();
    let mut host_lobby = host_handle.lobby();
    let mut host_events = host_handle.subscribe();

    let mut client = SessionManager::new(local_config());
    let client_handle = client.start_client("127.0.0.1", port).await.unwrap();

    host_handle.set_ready(true).unwrap();
    client_handle.set_ready(true).unwrap();
    wait_lobby(&mut host_lobby, |s| s.len() == 2 && s.can_start_game()).await;

    client_handle.request_start_game().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    while let Ok(event) = host_events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::SceneChanged { .. }),
            "non-host start must not transition"
        );
    }

    client.shutdown().await;
    host.shutdown().await;
}

#[tokio::test]
async fn test_client_leave_updates_host_lobby() {
    let mut host = SessionManager::new(local_config());
    let host_handle = host.start_dedicated_server_at(ephemeral(), 4).await.unwrap();
    let port = host_handle.local_addr().unwrap().port();
    let mut host_lobby = host_handle.lobby();

    let mut first = SessionManager::new(local_config());
    let mut second = SessionManager::new(local_config());
    first.start_client("127.0.0.1", port).await.unwrap();
    second.start_client("127.0.0.1", port).await.unwrap();

    let snap = wait_lobby(&mut host_lobby, |s| s.len() == 2).await;
    assert!(snap.players().iter().all(|p| !p.is_host), "dedicated server has no host player");

    first.shutdown().await;
    wait_lobby(&mut host_lobby, |s| s.len() == 1).await;

    second.shutdown().await;
    wait_lobby(&mut host_lobby, |s| s.is_empty()).await;
    host.shutdown().await;
}
