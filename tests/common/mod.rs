#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use duo_call::error::{Error, Result};
use duo_call::media::{LocalStream, LocalTrack, MediaDevices, Recorder, TrackKind, TrackSource};
use duo_call::relay::{Relay, RelayEvent};
use duo_call::room::RoomName;
use duo_call::signaling::{IceCandidate, SessionDescription, SignalingMessage};
use duo_call::transport::{OutboundSender, PeerFactory, PeerLink, TransportEvent, TransportSink};
use duo_call::{CallConfig, CallEvent, CallSession};

pub struct FakeRelay {
    id: String,
    published: Mutex<Vec<SignalingMessage>>,
    unsubscribes: AtomicUsize,
}

impl FakeRelay {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            published: Mutex::new(Vec::new()),
            unsubscribes: AtomicUsize::new(0),
        })
    }

    pub fn published(&self) -> Vec<SignalingMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn take_published(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Relay for FakeRelay {
    fn client_id(&self) -> &str {
        &self.id
    }

    async fn publish(&self, message: SignalingMessage) -> Result<()> {
        self.published.lock().unwrap().push(message);
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct LinkState {
    pub senders: Vec<OutboundSender>,
    pub receive_only: Vec<TrackKind>,
    pub replaced: Vec<TrackKind>,
    pub offers: usize,
    pub answers: usize,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    pub closes: usize,
}

/// Scripted connection. Like a browser it asks for negotiation when tracks
/// are added, gathers one candidate per local description and rejects
/// candidates that arrive before a remote description.
pub struct FakeLink {
    pub sink: TransportSink,
    pub state: Mutex<LinkState>,
    tag: String,
}

impl FakeLink {
    pub fn emit(&self, event: TransportEvent) {
        self.sink.emit(event);
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.state().senders.push(OutboundSender {
            kind: track.kind(),
            track: track.clone(),
        });
        self.sink.emit(TransportEvent::NegotiationNeeded);
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool> {
        let mut state = self.state();
        let Some(sender) = state.senders.iter_mut().find(|s| s.kind == kind) else {
            return Ok(false);
        };
        sender.track = track.clone();
        state.replaced.push(kind);
        Ok(true)
    }

    async fn receive_only(&self, kind: TrackKind) -> Result<()> {
        self.state().receive_only.push(kind);
        self.sink.emit(TransportEvent::NegotiationNeeded);
        Ok(())
    }

    async fn senders(&self) -> Vec<OutboundSender> {
        self.state().senders.clone()
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state();
        state.offers += 1;
        Ok(SessionDescription::offer(format!("v=0 {} offer {}", self.tag, state.offers)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state();
        match &state.remote {
            Some(remote) if remote.is_offer() => {}
            _ => return Err(Error::Negotiation("no remote offer to answer".to_string())),
        }
        state.answers += 1;
        Ok(SessionDescription::answer(format!("v=0 {} answer {}", self.tag, state.answers)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let candidate = IceCandidate::new(format!("candidate:{} {}", self.tag, desc.sdp));
        self.state().local = Some(desc);
        self.sink.emit(TransportEvent::LocalCandidate(candidate));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.sdp.contains("garbage") {
            return Err(Error::Negotiation("malformed description".to_string()));
        }
        self.state().remote = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state();
        if state.remote.is_none() {
            return Err(Error::Negotiation("remote description not set".to_string()));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state().closes += 1;
        Ok(())
    }
}

pub struct FakeFactory {
    tag: String,
    links: Mutex<Vec<Arc<FakeLink>>>,
}

impl FakeFactory {
    pub fn new(tag: &str) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.to_string(),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn link(&self, index: usize) -> Arc<FakeLink> {
        Arc::clone(&self.links.lock().unwrap()[index])
    }

    pub fn last(&self) -> Arc<FakeLink> {
        Arc::clone(self.links.lock().unwrap().last().expect("no connection created"))
    }
}

#[async_trait]
impl PeerFactory for FakeFactory {
    async fn create(&self, sink: TransportSink) -> Result<Arc<dyn PeerLink>> {
        let link = Arc::new(FakeLink {
            sink,
            state: Mutex::new(LinkState::default()),
            tag: self.tag.clone(),
        });
        self.links.lock().unwrap().push(Arc::clone(&link));
        Ok(link as Arc<dyn PeerLink>)
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub fail_user_media: bool,
    pub chunks: Vec<Bytes>,
}

struct FakeRecorder {
    chunks: Vec<Bytes>,
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn finish(self: Box<Self>) -> Result<Vec<Bytes>> {
        Ok(self.chunks)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(&self, stream_id: &str) -> Result<LocalStream> {
        if self.fail_user_media {
            return Err(Error::Media("camera permission denied".to_string()));
        }
        Ok(LocalStream::new(
            stream_id,
            vec![
                LocalTrack::new(TrackSource::Microphone, "mic", stream_id),
                LocalTrack::new(TrackSource::Camera, "cam", stream_id),
            ],
        ))
    }

    async fn display_media(&self, stream_id: &str) -> Result<LocalStream> {
        Ok(LocalStream::new(
            stream_id,
            vec![LocalTrack::new(TrackSource::Screen, "screen", stream_id)],
        ))
    }

    async fn recorder(&self, _stream: &LocalStream) -> Result<Box<dyn Recorder>> {
        Ok(Box::new(FakeRecorder {
            chunks: self.chunks.clone(),
        }))
    }
}

pub struct Peer {
    pub session: CallSession,
    pub relay: Arc<FakeRelay>,
    pub factory: Arc<FakeFactory>,
}

impl Peer {
    pub fn new(id: &str) -> Self {
        Self::with_devices(id, FakeDevices::default(), Path::new("."))
    }

    pub fn with_devices(id: &str, devices: FakeDevices, recording_dir: &Path) -> Self {
        let relay = FakeRelay::new(id);
        let factory = FakeFactory::new(id);
        let config = CallConfig {
            recording_dir: recording_dir.to_path_buf(),
            ..Default::default()
        };
        let session = CallSession::new(
            RoomName::resolve(Some("x")),
            Arc::clone(&relay) as Arc<dyn Relay>,
            Arc::clone(&factory) as Arc<dyn PeerFactory>,
            Arc::new(devices),
            &config,
        );
        Self {
            session,
            relay,
            factory,
        }
    }

    pub fn id(&self) -> String {
        self.session.local_id().to_string()
    }

    /// Feeds one relay event and everything it queues.
    pub async fn relay_event(&mut self, event: RelayEvent) {
        self.session.handle_event(CallEvent::Relay(event)).await;
        self.session.dispatch_queued().await;
    }

    pub async fn members(&mut self, ids: &[&str]) {
        self.relay_event(RelayEvent::Members(ids.iter().map(|s| s.to_string()).collect()))
            .await;
    }

    pub async fn receive(&mut self, from: &str, message: SignalingMessage) {
        self.relay_event(RelayEvent::Data {
            sender: from.to_string(),
            message,
        })
        .await;
    }

    pub async fn control(&mut self, control: duo_call::Control) {
        self.session.handle_event(CallEvent::Control(control)).await;
        self.session.dispatch_queued().await;
    }

    pub async fn transport(&mut self, event: TransportEvent) {
        self.factory.last().emit(event);
        self.session.dispatch_queued().await;
    }
}

/// Relays messages between two peers until neither has anything to send.
pub async fn exchange(a: &mut Peer, b: &mut Peer) {
    for _ in 0..16 {
        let from_a = a.relay.take_published();
        let from_b = b.relay.take_published();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        let a_id = a.id();
        let b_id = b.id();
        for message in from_a {
            b.receive(&a_id, message).await;
        }
        for message in from_b {
            a.receive(&b_id, message).await;
        }
    }
    panic!("signaling did not settle");
}

pub fn count<F: Fn(&SignalingMessage) -> bool>(messages: &[SignalingMessage], f: F) -> usize {
    messages.iter().filter(|m| f(m)).count()
}
