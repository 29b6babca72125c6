use anyhow::Error as AnyhowError;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The relay reported a failure or refused a frame.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// A description or candidate could not be applied.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Relay connection closed")]
    RelayClosed,

    #[error(transparent)]
    Other(#[from] AnyhowError),
}

pub type Result<T> = std::result::Result<T, Error>;
