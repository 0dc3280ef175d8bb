//! Session Configuration
//!
//! Built from defaults, then overridden from `LOBBY_*` environment variables
//! (a `.env` file is loaded by the binary). Bad ports and addresses fall back
//! to defaults with a warning instead of failing.

use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use tracing::warn;

use crate::game::facing::DEFAULT_POINTER_SENSITIVITY;
use crate::game::tick::MovementConfig;
use crate::{DEFAULT_ADDRESS, DEFAULT_PORT, TICK_RATE};

/// Which transport role this process takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Authoritative and also a player (peer 1).
    #[default]
    Host,
    /// Authoritative only; peer 1 never plays.
    Dedicated,
    /// Connects to an authority.
    Client,
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "dedicated" | "server" => Ok(Self::Dedicated),
            "client" | "join" => Ok(Self::Client),
            other => Err(format!("unknown session mode '{}'", other)),
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Host => "host",
            Self::Dedicated => "dedicated",
            Self::Client => "client",
        };
        f.write_str(name)
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Transport role.
    pub mode: SessionMode,
    /// Authority address a client connects to.
    pub address: String,
    /// Port to listen on or connect to.
    pub port: u16,
    /// Interface the authority binds.
    pub bind_ip: IpAddr,
    /// Maximum connected remote peers.
    pub max_peers: usize,
    /// Simulation rate (Hz).
    pub tick_rate: u32,
    /// Gameplay scene resource. Starting a game requires it.
    pub gameplay_scene: Option<String>,
    /// Lobby scene resource.
    pub lobby_scene: String,
    /// Movement tuning.
    pub movement: MovementConfig,
    /// Radians of yaw per unit of horizontal pointer motion.
    pub pointer_sensitivity: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Host,
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_peers: 8,
            tick_rate: TICK_RATE,
            gameplay_scene: Some("arena".to_string()),
            lobby_scene: "lobby".to_string(),
            movement: MovementConfig::default(),
            pointer_sensitivity: DEFAULT_POINTER_SENSITIVITY,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("LOBBY_MODE") {
            match raw.parse() {
                Ok(mode) => config.mode = mode,
                Err(e) => warn!("{}, using {}", e, config.mode),
            }
        }
        if let Some(raw) = lookup("LOBBY_ADDRESS") {
            config.address = parse_address(&raw);
        }
        if let Some(raw) = lookup("LOBBY_PORT") {
            config.port = parse_port(&raw);
        }
        if let Some(raw) = lookup("LOBBY_BIND_IP") {
            match raw.trim().parse() {
                Ok(ip) => config.bind_ip = ip,
                Err(_) => warn!("Invalid bind address '{}', using {}", raw, config.bind_ip),
            }
        }
        if let Some(raw) = lookup("LOBBY_MAX_PEERS") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_peers = n,
                _ => warn!("Invalid peer limit '{}', using {}", raw, config.max_peers),
            }
        }
        if let Some(raw) = lookup("LOBBY_TICK_RATE") {
            match raw.trim().parse::<u32>() {
                Ok(hz) if (1..=240).contains(&hz) => config.tick_rate = hz,
                _ => warn!("Invalid tick rate '{}', using {}", raw, config.tick_rate),
            }
        }
        if let Some(raw) = lookup("LOBBY_GAMEPLAY_SCENE") {
            let raw = raw.trim();
            config.gameplay_scene = (!raw.is_empty()).then(|| raw.to_string());
        }
        if let Some(raw) = lookup("LOBBY_LOBBY_SCENE") {
            if !raw.trim().is_empty() {
                config.lobby_scene = raw.trim().to_string();
            }
        }

        config
    }

    /// Fixed tick length in seconds.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

/// Parse a port, falling back to [`DEFAULT_PORT`] outside 1-65535.
pub fn parse_port(raw: &str) -> u16 {
    match raw.trim().parse::<u32>() {
        Ok(port @ 1..=65535) => port as u16,
        _ => {
            warn!("Invalid port '{}', using {}", raw, DEFAULT_PORT);
            DEFAULT_PORT
        }
    }
}

/// Port 0 is not a usable session port; it falls back to [`DEFAULT_PORT`].
pub fn checked_port(port: u16) -> u16 {
    if port == 0 {
        warn!("Invalid port 0, using {}", DEFAULT_PORT);
        DEFAULT_PORT
    } else {
        port
    }
}

/// Validate an IP address or host name, falling back to [`DEFAULT_ADDRESS`].
pub fn parse_address(raw: &str) -> String {
    let candidate = raw.trim();
    if candidate.parse::<IpAddr>().is_ok() || is_host_name(candidate) {
        candidate.to_string()
    } else {
        warn!("Invalid address '{}', using {}", raw, DEFAULT_ADDRESS);
        DEFAULT_ADDRESS.to_string()
    }
}

fn is_host_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.mode, SessionMode::Host);
        assert!(config.gameplay_scene.is_some());
    }

    #[test]
    fn test_port_fallback() {
        assert_eq!(parse_port("9000"), 9000);
        assert_eq!(parse_port(" 65535 "), 65535);
        assert_eq!(parse_port("0"), DEFAULT_PORT);
        assert_eq!(parse_port("70000"), DEFAULT_PORT);
        assert_eq!(parse_port("abc"), DEFAULT_PORT);
        assert_eq!(parse_port("-1"), DEFAULT_PORT);
    }

    #[test]
    fn test_checked_port() {
        assert_eq!(checked_port(9000), 9000);
        assert_eq!(checked_port(65535), 65535);
        assert_eq!(checked_port(0), DEFAULT_PORT);
    }

    #[test]
    fn test_address_fallback() {
        assert_eq!(parse_address("10.0.0.2"), "10.0.0.2");
        assert_eq!(parse_address("::1"), "::1");
        assert_eq!(parse_address("game.example.org"), "game.example.org");
        assert_eq!(parse_address("not an address"), DEFAULT_ADDRESS);
        assert_eq!(parse_address(""), DEFAULT_ADDRESS);
        assert_eq!(parse_address("bad..name"), DEFAULT_ADDRESS);
    }

    #[test]
    fn test_from_lookup() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("LOBBY_MODE", "Dedicated"),
            ("LOBBY_PORT", "9001"),
            ("LOBBY_MAX_PEERS", "16"),
            ("LOBBY_TICK_RATE", "30"),
            ("LOBBY_GAMEPLAY_SCENE", "res://maps/canyon"),
        ]));
        assert_eq!(config.mode, SessionMode::Dedicated);
        assert_eq!(config.port, 9001);
        assert_eq!(config.max_peers, 16);
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.gameplay_scene.as_deref(), Some("res://maps/canyon"));
    }

    #[test]
    fn test_from_lookup_bad_values_keep_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("LOBBY_MODE", "spectator"),
            ("LOBBY_PORT", "99999"),
            ("LOBBY_MAX_PEERS", "0"),
            ("LOBBY_TICK_RATE", "fast"),
            ("LOBBY_GAMEPLAY_SCENE", "  "),
        ]));
        assert_eq!(config.mode, SessionMode::Host);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_peers, 8);
        assert_eq!(config.tick_rate, TICK_RATE);
        assert_eq!(config.gameplay_scene, None, "blank scene unsets it");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("client".parse::<SessionMode>(), Ok(SessionMode::Client));
        assert_eq!("HOST".parse::<SessionMode>(), Ok(SessionMode::Host));
        assert!("".parse::<SessionMode>().is_err());
    }
}
