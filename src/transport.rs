//! Seam between the negotiation state machine and the real-time transport
//! engine. The engine is driven through [`PeerLink`] and reports back through
//! a [`TransportSink`], which only enqueues events for the session loop.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::connection::IceState;
use crate::error::Result;
use crate::media::{LocalTrack, TrackKind};
use crate::session::CallEvent;
use crate::signaling::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local ICE candidate was gathered and should be relayed.
    LocalCandidate(IceCandidate),
    /// A remote track arrived; fires once per track of a stream.
    StreamAdded { stream_id: String, kind: TrackKind },
    /// A remote stream stopped delivering media.
    StreamRemoved { stream_id: String },
    NegotiationNeeded,
    IceStateChanged(IceState),
}

/// Event sink bound to one connection. Events carry the connection's epoch
/// so the session can discard those from a connection it already replaced.
#[derive(Clone)]
pub struct TransportSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl TransportSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<CallEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns false once the session has gone away.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(CallEvent::Transport {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// An outbound sender as seen by the track controls.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    pub kind: TrackKind,
    pub track: LocalTrack,
}

/// One live peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    /// Replaces the track on the existing sender of `kind`, keeping the
    /// sender. Returns false when there is no such sender.
    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool>;

    /// Asks to receive `kind` without sending anything.
    async fn receive_only(&self, kind: TrackKind) -> Result<()>;

    async fn senders(&self) -> Vec<OutboundSender>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Creates a connection whose callbacks report into `sink`.
    async fn create(&self, sink: TransportSink) -> Result<Arc<dyn PeerLink>>;
}
