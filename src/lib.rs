//! Two-party video calls negotiated over a publish/subscribe relay.
//!
//! The [`session::CallSession`] state machine consumes relay events and
//! transport callbacks, negotiates a single WebRTC peer connection and keeps
//! the [`room::RemoteStreams`] registry in step with it.

pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod relay;
pub mod room;
pub mod rtc;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::CallConfig;
pub use connection::{CallPhase, CallStatus};
pub use error::{Error, Result};
pub use session::{CallEvent, CallHandle, CallSession, Control};
pub use signaling::SignalingMessage;
