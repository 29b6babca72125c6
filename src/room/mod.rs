pub mod registry;
pub mod state;

pub use registry::{DisplayHandle, GridLayout, RemoteStreams};
pub use state::{MembershipDecision, RoomState, MAX_PARTICIPANTS};

use rand::Rng;
use std::fmt;

/// Prefix the relay requires for rooms whose membership is observable.
pub const ROOM_PREFIX: &str = "observable-";

/// Relay room name derived from the secret shared through the invite link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomName {
    secret: String,
    name: String,
}

impl RoomName {
    /// Uses `secret` when present and non-empty, otherwise generates a fresh
    /// 24-bit hex secret that becomes the new invite fragment.
    pub fn resolve(secret: Option<&str>) -> Self {
        let secret = match secret.map(|s| s.trim_start_matches('#')) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => format!("{:x}", rand::thread_rng().gen_range(0..0xff_ffffu32)),
        };
        Self {
            name: format!("{}{}", ROOM_PREFIX, secret),
            secret,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Fragment to share so a second participant lands in the same room.
    pub fn invite_fragment(&self) -> String {
        format!("#{}", self.secret)
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
