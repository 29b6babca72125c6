//! Negotiation state machine.
//!
//! A [`CallSession`] owns the room view, the single peer connection, the
//! remote stream registry and local media. Relay events, transport callbacks
//! and user controls all arrive as [`CallEvent`]s and are handled one at a
//! time, so an offer/answer round started by one event has completed before
//! the next event is looked at.

use std::mem;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::connection::{CallPhase, CallStatus, ConnectionMonitor};
use crate::error::{Error, Result};
use crate::media::{LocalMedia, MediaDevices, TrackKind};
use crate::relay::{MemberId, Relay, RelayEvent};
use crate::room::{MembershipDecision, RemoteStreams, RoomName, RoomState};
use crate::signaling::{IceCandidate, SessionDescription, SignalingMessage};
use crate::transport::{PeerFactory, PeerLink, TransportEvent, TransportSink};

/// How often status is republished while a recording runs.
const RECORDING_TICK: Duration = Duration::from_secs(1);

/// User-facing call controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Leave,
    ToggleMute,
    ToggleCamera,
    ToggleScreenShare,
    ToggleRecording,
}

impl FromStr for Control {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leave" | "quit" | "exit" => Ok(Control::Leave),
            "mute" | "unmute" => Ok(Control::ToggleMute),
            "camera" | "cam" => Ok(Control::ToggleCamera),
            "share" | "screen" => Ok(Control::ToggleScreenShare),
            "record" | "rec" => Ok(Control::ToggleRecording),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

#[derive(Debug)]
pub enum CallEvent {
    Relay(RelayEvent),
    /// Reported by the connection created at `epoch`.
    Transport { epoch: u64, event: TransportEvent },
    Control(Control),
}

/// Cloneable handle for feeding controls to a running session and watching
/// its status.
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<CallEvent>,
    status: watch::Receiver<CallStatus>,
}

impl CallHandle {
    /// Returns false once the session has stopped.
    pub fn send(&self, control: Control) -> bool {
        self.tx.send(CallEvent::Control(control)).is_ok()
    }

    pub fn leave(&self) -> bool {
        self.send(Control::Leave)
    }

    pub fn status(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }
}

struct ActivePeer {
    link: Arc<dyn PeerLink>,
    epoch: u64,
    offerer: bool,
    has_remote_description: bool,
    /// Remote candidates that arrived before the remote description.
    pending_candidates: Vec<IceCandidate>,
    awaiting_answer: bool,
    /// Renegotiation requested while an offer was still unanswered.
    renegotiate_pending: bool,
}

pub struct CallSession {
    room: RoomState,
    relay: Arc<dyn Relay>,
    factory: Arc<dyn PeerFactory>,
    media: LocalMedia,
    remote: RemoteStreams,
    peer: Option<ActivePeer>,
    phase: CallPhase,
    epoch: u64,
    monitor: ConnectionMonitor,
    inbox_tx: mpsc::UnboundedSender<CallEvent>,
    inbox_rx: Option<mpsc::UnboundedReceiver<CallEvent>>,
}

impl CallSession {
    pub fn new(
        room: RoomName,
        relay: Arc<dyn Relay>,
        factory: Arc<dyn PeerFactory>,
        devices: Arc<dyn MediaDevices>,
        config: &CallConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let local_id = relay.client_id().to_string();
        Self {
            room: RoomState::new(room, local_id),
            relay,
            factory,
            media: LocalMedia::new(devices, config.recording_dir.clone()),
            remote: RemoteStreams::new(),
            peer: None,
            phase: CallPhase::Idle,
            epoch: 0,
            monitor: ConnectionMonitor::new(),
            inbox_tx,
            inbox_rx: Some(inbox_rx),
        }
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            tx: self.inbox_tx.clone(),
            status: self.monitor.subscribe(),
        }
    }

    pub fn local_id(&self) -> &str {
        self.room.local_id()
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn has_connection(&self) -> bool {
        self.peer.is_some()
    }

    pub fn is_offerer(&self) -> Option<bool> {
        self.peer.as_ref().map(|p| p.offerer)
    }

    /// Epoch of the live connection, if any.
    pub fn epoch(&self) -> Option<u64> {
        self.peer.as_ref().map(|p| p.epoch)
    }

    pub fn remote_streams(&self) -> &RemoteStreams {
        &self.remote
    }

    /// Derived from the registry: remote entries plus ourselves.
    pub fn participants(&self) -> usize {
        self.remote.participants()
    }

    pub fn media(&self) -> &LocalMedia {
        &self.media
    }

    pub fn status(&self) -> CallStatus {
        self.monitor.current()
    }

    /// Processes events until the call is closed or every source is gone.
    pub async fn run(mut self, mut relay_events: mpsc::Receiver<RelayEvent>) {
        let Some(mut inbox) = self.inbox_rx.take() else {
            warn!("Session is already running");
            return;
        };
        info!(room = %self.room.name(), client_id = self.local_id(), "Call session started");

        let mut tick = tokio::time::interval(RECORDING_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                Some(event) = relay_events.recv() => CallEvent::Relay(event),
                Some(event) = inbox.recv() => event,
                _ = tick.tick(), if self.media.is_recording() => {
                    self.publish_status();
                    continue;
                }
                else => break,
            };
            self.handle_event(event).await;
            if self.phase == CallPhase::Closed {
                break;
            }
        }
        info!(room = %self.room.name(), "Call session ended");
    }

    /// Handles every event already queued by transport callbacks or handles
    /// without waiting for new ones. Returns how many were handled.
    pub async fn dispatch_queued(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let next = match self.inbox_rx.as_mut() {
                Some(inbox) => inbox.try_recv().ok(),
                None => None,
            };
            let Some(event) = next else { break };
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Applies one event. Failures are logged and recorded in the status;
    /// they never stop the session.
    pub async fn handle_event(&mut self, event: CallEvent) {
        if self.phase == CallPhase::Closed {
            debug!(?event, "Ignoring event after close");
            return;
        }

        let result = match event {
            CallEvent::Relay(event) => self.on_relay_event(event).await,
            CallEvent::Transport { epoch, event } => self.on_transport_event(epoch, event).await,
            CallEvent::Control(control) => self.on_control(control).await,
        };

        if let Err(e) = result {
            warn!(room = %self.room.name(), phase = %self.phase, "Call event failed: {}", e);
            self.monitor.set_error(e.to_string());
        }
        self.publish_status();
    }

    async fn on_relay_event(&mut self, event: RelayEvent) -> Result<()> {
        match event {
            RelayEvent::Members(members) => self.on_members(members).await,
            RelayEvent::MemberJoined(member) => {
                if member != self.room.local_id() {
                    self.room.add_member(member);
                }
                Ok(())
            }
            RelayEvent::MemberLeft(member) => {
                self.room.remove_member(&member);
                self.on_peer_left(&member);
                Ok(())
            }
            RelayEvent::Data { sender, message } => self.on_signaling(sender, message).await,
            RelayEvent::Error(message) => Err(Error::Signaling(message)),
            RelayEvent::Closed => Err(Error::RelayClosed),
        }
    }

    async fn on_members(&mut self, members: Vec<MemberId>) -> Result<()> {
        match self.room.apply_members(members) {
            MembershipDecision::Admit { offerer } => self.initialize(offerer).await,
            MembershipDecision::Refuse { announce } => {
                self.monitor.set_room_full();
                if announce {
                    info!(room = %self.room.name(), "Maximum participant limit reached, not connecting");
                    self.relay.publish(SignalingMessage::LimitReached).await?;
                }
                Ok(())
            }
            MembershipDecision::Ignore => Ok(()),
        }
    }

    /// Replaces any existing connection with a fresh one and attaches local
    /// media. Attaching tracks makes the transport ask for negotiation.
    async fn initialize(&mut self, offerer: bool) -> Result<()> {
        if self.close_peer().await {
            // Streams of the old connection can no longer report their end.
            self.remote.clear_all();
        }

        self.epoch += 1;
        let epoch = self.epoch;
        self.phase = CallPhase::Connecting;

        let link = match self
            .factory
            .create(TransportSink::new(epoch, self.inbox_tx.clone()))
            .await
        {
            Ok(link) => link,
            Err(e) => {
                self.phase = CallPhase::Idle;
                return Err(e);
            }
        };
        info!(room = %self.room.name(), epoch, offerer, "Peer connection created");

        self.peer = Some(ActivePeer {
            link: Arc::clone(&link),
            epoch,
            offerer,
            has_remote_description: false,
            pending_candidates: Vec::new(),
            awaiting_answer: false,
            renegotiate_pending: false,
        });

        let local_id = self.room.local_id().to_string();
        if self.media.acquire(&local_id).await.is_some() {
            self.media.attach(link.as_ref()).await?;
        } else {
            // Still receive the other side's media.
            link.receive_only(TrackKind::Audio).await?;
            link.receive_only(TrackKind::Video).await?;
        }
        Ok(())
    }

    /// Creates and publishes a fresh offer. Only the offerer does this, and
    /// only one offer is outstanding at a time; a request arriving while an
    /// offer is unanswered is replayed once the answer lands.
    async fn renegotiate(&mut self) -> Result<()> {
        let Some(peer) = self.peer.as_mut() else {
            return Ok(());
        };
        if !peer.offerer {
            debug!("Negotiation needed, waiting for remote offer");
            return Ok(());
        }
        if peer.awaiting_answer {
            debug!(epoch = peer.epoch, "Offer in flight, deferring renegotiation");
            peer.renegotiate_pending = true;
            return Ok(());
        }

        let link = Arc::clone(&peer.link);
        let previous = self.phase;
        self.phase = CallPhase::Negotiating;

        let offer = match create_local(link.as_ref(), true).await {
            Ok(offer) => offer,
            Err(e) => {
                self.phase = previous;
                return Err(e);
            }
        };
        if let Err(e) = self.relay.publish(SignalingMessage::Sdp(offer)).await {
            self.phase = previous;
            return Err(e);
        }
        if let Some(peer) = self.peer.as_mut() {
            peer.awaiting_answer = true;
        }
        info!(room = %self.room.name(), "Offer sent");
        Ok(())
    }

    async fn on_signaling(&mut self, sender: MemberId, message: SignalingMessage) -> Result<()> {
        if sender == self.room.local_id() {
            return Ok(());
        }
        debug!(from = %sender, kind = message.label(), "Signaling message");

        match message {
            SignalingMessage::Sdp(desc) => self.on_remote_description(desc).await,
            SignalingMessage::Candidate(candidate) => self.on_remote_candidate(candidate).await,
            SignalingMessage::Left => {
                self.on_peer_left(&sender);
                Ok(())
            }
            SignalingMessage::LimitReached => {
                info!(from = %sender, "A participant was turned away, room is full");
                Ok(())
            }
        }
    }

    async fn on_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        let Some(peer) = self.peer.as_mut() else {
            debug!(kind = %desc.kind, "No connection, ignoring remote description");
            return Ok(());
        };
        let link = Arc::clone(&peer.link);
        let is_offer = desc.is_offer();
        if is_offer {
            // A remote offer supersedes any of ours still waiting for an answer.
            peer.awaiting_answer = false;
            peer.renegotiate_pending = false;
        }
        let previous = self.phase;
        self.phase = CallPhase::Negotiating;

        if let Err(e) = link.set_remote_description(desc).await {
            self.phase = previous;
            return Err(e);
        }
        peer.has_remote_description = true;

        for candidate in mem::take(&mut peer.pending_candidates) {
            if let Err(e) = link.add_ice_candidate(candidate).await {
                warn!("Buffered candidate rejected: {}", e);
            }
        }

        if is_offer {
            let answer = match create_local(link.as_ref(), false).await {
                Ok(answer) => answer,
                Err(e) => {
                    self.phase = previous;
                    return Err(e);
                }
            };
            self.phase = CallPhase::Stable;
            self.relay.publish(SignalingMessage::Sdp(answer)).await?;
            info!(room = %self.room.name(), "Answer sent");
            Ok(())
        } else {
            peer.awaiting_answer = false;
            let replay = mem::take(&mut peer.renegotiate_pending);
            self.phase = CallPhase::Stable;
            info!(room = %self.room.name(), "Answer applied");
            if replay {
                self.renegotiate().await?;
            }
            Ok(())
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let Some(peer) = self.peer.as_mut() else {
            debug!("No connection, ignoring remote candidate");
            return Ok(());
        };
        if !peer.has_remote_description {
            debug!("Buffering candidate until remote description is set");
            peer.pending_candidates.push(candidate);
            return Ok(());
        }
        peer.link.add_ice_candidate(candidate).await
    }

    /// Drops the member's stream. The connection stays open for the next
    /// joiner, so an offer the member never answered is abandoned.
    fn on_peer_left(&mut self, member: &str) {
        if self.remote.on_peer_left(member).is_none() {
            return;
        }
        info!(peer = member, participants = self.remote.participants(), "Participant left");
        if let Some(peer) = self.peer.as_mut() {
            peer.renegotiate_pending = false;
            if mem::take(&mut peer.awaiting_answer) && self.phase == CallPhase::Negotiating {
                self.phase = CallPhase::Connecting;
            }
        }
    }

    async fn on_transport_event(&mut self, epoch: u64, event: TransportEvent) -> Result<()> {
        if self.epoch() != Some(epoch) {
            debug!(epoch, ?event, "Ignoring event from a replaced connection");
            return Ok(());
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.relay.publish(SignalingMessage::Candidate(candidate)).await
            }
            TransportEvent::StreamAdded { stream_id, .. } => {
                self.remote.on_stream_added(&stream_id);
                Ok(())
            }
            TransportEvent::StreamRemoved { stream_id } => {
                self.remote.on_stream_removed(&stream_id);
                Ok(())
            }
            TransportEvent::NegotiationNeeded => self.renegotiate().await,
            TransportEvent::IceStateChanged(state) => {
                self.monitor.update_ice_state(state);
                Ok(())
            }
        }
    }

    async fn on_control(&mut self, control: Control) -> Result<()> {
        if control == Control::Leave {
            return self.leave().await;
        }
        let Some(link) = self.peer.as_ref().map(|p| Arc::clone(&p.link)) else {
            debug!(?control, "No connection yet, ignoring control");
            return Ok(());
        };

        match control {
            Control::ToggleMute => {
                self.media.toggle_mute(link.as_ref()).await;
            }
            Control::ToggleCamera => {
                self.media.toggle_camera(link.as_ref()).await;
            }
            Control::ToggleScreenShare => {
                let local_id = self.room.local_id().to_string();
                self.media.toggle_screen_share(link.as_ref(), &local_id).await?;
                self.renegotiate().await?;
            }
            Control::ToggleRecording => {
                if let Some(path) = self.media.toggle_recording().await? {
                    info!(path = %path.display(), "Recording written");
                }
            }
            Control::Leave => {}
        }
        Ok(())
    }

    /// Leaves the room and tears everything down. Later events are ignored.
    async fn leave(&mut self) -> Result<()> {
        info!(room = %self.room.name(), "Leaving call");
        if let Err(e) = self.relay.unsubscribe().await {
            warn!("Unsubscribe failed: {}", e);
        }
        self.close_peer().await;
        self.media.release().await;
        self.remote.clear_all();
        self.phase = CallPhase::Closed;
        self.relay.publish(SignalingMessage::Left).await
    }

    /// Returns whether a connection was open.
    async fn close_peer(&mut self) -> bool {
        let Some(peer) = self.peer.take() else {
            return false;
        };
        if let Err(e) = peer.link.close().await {
            warn!(epoch = peer.epoch, "Closing peer connection failed: {}", e);
        }
        info!(epoch = peer.epoch, "Peer connection closed");
        true
    }

    fn publish_status(&self) {
        let phase = self.phase;
        let offerer = self.is_offerer();
        let participants = self.remote.participants();
        let layout = self.remote.layout();
        let remote_streams = self.remote.stream_ids();
        let muted = self.media.is_muted();
        let camera_on = self.media.is_camera_on();
        let screen_sharing = self.media.is_screen_sharing();
        let recording = self.media.recording_elapsed();

        self.monitor.update(|status| {
            status.phase = phase;
            status.offerer = offerer;
            status.participants = participants;
            status.layout = layout;
            status.remote_streams = remote_streams;
            status.muted = muted;
            status.camera_on = camera_on;
            status.screen_sharing = screen_sharing;
            status.recording = recording;
        });
    }
}

/// Creates an offer or answer and installs it as the local description.
async fn create_local(link: &dyn PeerLink, offer: bool) -> Result<SessionDescription> {
    let desc = if offer {
        link.create_offer().await?
    } else {
        link.create_answer().await?
    };
    link.set_local_description(desc.clone()).await?;
    Ok(desc)
}
