use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub relay_url: String,
    /// Shared secret from the invite link. A random one is generated when unset.
    pub room_secret: Option<String>,
    pub ice_servers: Vec<String>,
    pub recording_dir: PathBuf,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            room_secret: None,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            recording_dir: PathBuf::from("."),
        }
    }
}

/// Two-party video call over a publish/subscribe relay.
#[derive(Debug, Parser)]
#[command(name = "duo-call", version)]
pub struct CliArgs {
    /// WebSocket URL of the relay
    #[arg(long, env = "DUO_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    pub relay_url: String,

    /// Room secret shared through the invite link (with or without '#')
    #[arg(long, env = "DUO_ROOM")]
    pub room: Option<String>,

    /// STUN/TURN server URL, may be repeated
    #[arg(long = "ice-server")]
    pub ice_servers: Vec<String>,

    /// Directory recordings are written to
    #[arg(long, env = "DUO_RECORDING_DIR", default_value = ".")]
    pub recording_dir: PathBuf,
}

impl CliArgs {
    pub fn into_config(self) -> CallConfig {
        let defaults = CallConfig::default();
        CallConfig {
            relay_url: self.relay_url,
            room_secret: self.room,
            ice_servers: if self.ice_servers.is_empty() {
                defaults.ice_servers
            } else {
                self.ice_servers
            },
            recording_dir: self.recording_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_public_stun() {
        let config = CliArgs::try_parse_from(["duo-call"]).unwrap().into_config();
        assert_eq!(config.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(config.room_secret, None);
    }

    #[test]
    fn repeated_ice_servers_replace_default() {
        let config = CliArgs::try_parse_from([
            "duo-call",
            "--room",
            "#c0ffee",
            "--ice-server",
            "stun:a.example:3478",
            "--ice-server",
            "turn:b.example:3478",
        ])
        .unwrap()
        .into_config();
        assert_eq!(config.room_secret.as_deref(), Some("#c0ffee"));
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CallConfig = serde_json::from_str(r#"{"room_secret":"abc"}"#).unwrap();
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.room_secret.as_deref(), Some("abc"));
    }
}
