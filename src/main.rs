//! Lobby Authority Server
//!
//! Runs one session role, chosen by `LOBBY_MODE`, until Ctrl-C.

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lobby_authority::{SessionConfig, SessionEvent, SessionManager, SessionMode, TICK_RATE, VERSION};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = SessionConfig::from_env();
    info!("Lobby Authority v{}", VERSION);
    info!("Mode: {} | Tick Rate: {} Hz (default {})", config.mode, config.tick_rate, TICK_RATE);

    let mut manager = SessionManager::new(config.clone());
    let handle = match config.mode {
        SessionMode::Host => manager
            .start_host(config.port, config.max_peers)
            .await
            .context("failed to start host")?,
        SessionMode::Dedicated => manager
            .start_dedicated_server(config.port, config.max_peers)
            .await
            .context("failed to start dedicated server")?,
        SessionMode::Client => manager
            .start_client(&config.address, config.port)
            .await
            .context("failed to connect")?,
    };

    if let Some(addr) = handle.local_addr() {
        info!("Listening on {}", addr);
    }

    let mut events = handle.subscribe();
    let mut lobby = handle.lobby();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            changed = lobby.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = lobby.borrow_and_update().clone();
                info!(
                    players = snapshot.len(),
                    can_start = snapshot.can_start_game(),
                    "Lobby: {}",
                    snapshot
                        .players()
                        .iter()
                        .map(|p| format!("{}{}", p.display_name, if p.is_ready { " (ready)" } else { "" }))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Disconnected { reason }) => {
                    warn!("Session ended: {}", reason);
                    break;
                }
                Ok(event) => info!(?event, "Session event"),
                Err(RecvError::Lagged(n)) => warn!("Dropped {} session events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}
