use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

use crate::room::GridLayout;

/// Negotiation phase of the call.
///
/// `Negotiating` is re-entered whenever an offer/answer round starts, so the
/// usual path is `Idle → Connecting → Negotiating ⇄ Stable → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPhase {
    Idle,
    Connecting,
    Negotiating,
    Stable,
    Closed,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallPhase::Idle => write!(f, "Idle"),
            CallPhase::Connecting => write!(f, "Connecting"),
            CallPhase::Negotiating => write!(f, "Negotiating"),
            CallPhase::Stable => write!(f, "Stable"),
            CallPhase::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCIceConnectionState> for IceState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => IceState::Checking,
            RTCIceConnectionState::Connected => IceState::Connected,
            RTCIceConnectionState::Completed => IceState::Completed,
            RTCIceConnectionState::Disconnected => IceState::Disconnected,
            RTCIceConnectionState::Failed => IceState::Failed,
            RTCIceConnectionState::Closed => IceState::Closed,
            _ => IceState::New,
        }
    }
}

impl fmt::Display for IceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Snapshot of everything a front end needs to render the call.
#[derive(Debug, Clone, Serialize)]
pub struct CallStatus {
    pub phase: CallPhase,
    pub ice_state: IceState,
    pub offerer: Option<bool>,
    pub participants: usize,
    pub layout: GridLayout,
    pub remote_streams: Vec<String>,
    pub muted: bool,
    pub camera_on: bool,
    pub screen_sharing: bool,
    /// Elapsed `mm:ss` of the running recording.
    pub recording: Option<String>,
    pub room_full: bool,
    pub last_error: Option<String>,
}

impl Default for CallStatus {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            ice_state: IceState::New,
            offerer: None,
            participants: 1,
            layout: GridLayout::default(),
            remote_streams: Vec::new(),
            muted: false,
            camera_on: true,
            screen_sharing: false,
            recording: None,
            room_full: false,
            last_error: None,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionMonitor {
    status: Arc<watch::Sender<CallStatus>>,
    receiver: watch::Receiver<CallStatus>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(CallStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut CallStatus)) {
        self.status.send_modify(f);
    }

    pub fn update_ice_state(&self, state: IceState) {
        self.status.send_modify(|status| {
            status.ice_state = state;
        });
    }

    pub fn set_room_full(&self) {
        self.status.send_modify(|status| {
            status.room_full = true;
        });
    }

    pub fn set_error(&self, error: String) {
        self.status.send_modify(|status| {
            status.last_error = Some(error);
        });
    }

    pub fn current(&self) -> CallStatus {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.receiver.clone()
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
