//! Local media: capture streams, outbound tracks and the user-facing
//! mute / camera / screen-share / recording toggles.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Error, Result};
use crate::transport::PeerLink;

pub const RECORDING_FILE_NAME: &str = "recording.webm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

/// An outbound track. Clones share the enabled flag, so toggling through a
/// sender affects whatever capture loop feeds the same track.
#[derive(Clone)]
pub struct LocalTrack {
    source: TrackSource,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(source: TrackSource, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let codec = match source.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        Self {
            source,
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
            rtc: Arc::new(TrackLocalStaticSample::new(codec, id.into(), stream_id.into())),
        }
    }

    pub fn id(&self) -> &str {
        self.rtc.id()
    }

    pub fn stream_id(&self) -> &str {
        self.rtc.stream_id()
    }

    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }

    /// Forwards a captured sample. Disabled or stopped tracks swallow it,
    /// which is how mute and camera-off reach the wire.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if !self.is_enabled() || !self.is_live() {
            return Ok(false);
        }
        self.rtc.write_sample(sample).await?;
        Ok(true)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("stream_id", &self.stream_id())
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Capture devices. Camera/microphone and screen streams are created with the
/// given stream id so the remote side can key them by our relay identity.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn user_media(&self, stream_id: &str) -> Result<LocalStream>;

    async fn display_media(&self, stream_id: &str) -> Result<LocalStream>;

    async fn recorder(&self, stream: &LocalStream) -> Result<Box<dyn Recorder>>;
}

/// A running recording of a local stream, delivered as encoded chunks.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn finish(self: Box<Self>) -> Result<Vec<Bytes>>;
}

/// Devices that hand out real outbound tracks without opening hardware.
/// Samples are written by whatever drives [`LocalTrack::write_sample`].
#[derive(Debug, Default)]
pub struct SyntheticDevices;

impl SyntheticDevices {
    pub fn new() -> Self {
        Self
    }
}

struct EmptyRecorder;

#[async_trait]
impl Recorder for EmptyRecorder {
    async fn finish(self: Box<Self>) -> Result<Vec<Bytes>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn user_media(&self, stream_id: &str) -> Result<LocalStream> {
        Ok(LocalStream::new(
            stream_id,
            vec![
                LocalTrack::new(TrackSource::Microphone, "audio", stream_id),
                LocalTrack::new(TrackSource::Camera, "video", stream_id),
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
        Ok(Box::new(EmptyRecorder))
    }
}

struct ActiveRecording {
    recorder: Box<dyn Recorder>,
    started: Instant,
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub struct LocalMedia {
    devices: Arc<dyn MediaDevices>,
    camera: Option<LocalStream>,
    screen: Option<LocalStream>,
    muted: bool,
    camera_on: bool,
    recording: Option<ActiveRecording>,
    recording_dir: PathBuf,
}

impl LocalMedia {
    pub fn new(devices: Arc<dyn MediaDevices>, recording_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices,
            camera: None,
            screen: None,
            muted: false,
            camera_on: true,
            recording: None,
            recording_dir: recording_dir.into(),
        }
    }

    /// Opens camera and microphone once. A failure is logged and leaves the
    /// call without outbound media.
    pub async fn acquire(&mut self, stream_id: &str) -> Option<&LocalStream> {
        if self.camera.is_none() {
            match self.devices.user_media(stream_id).await {
                Ok(stream) => {
                    info!(stream_id, tracks = stream.tracks().len(), "Local media acquired");
                    self.camera = Some(stream);
                }
                Err(e) => warn!("Could not acquire local media: {}", e),
            }
        }
        self.camera.as_ref()
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.camera.as_ref()
    }

    /// Adds every local track to the connection, honouring the current
    /// mute and camera flags. Video goes out as the screen while sharing.
    pub async fn attach(&self, link: &dyn PeerLink) -> Result<()> {
        let Some(camera) = &self.camera else {
            return Ok(());
        };
        for track in camera.tracks() {
            let track = match (track.kind(), &self.screen) {
                (TrackKind::Video, Some(screen)) => screen.track(TrackKind::Video).unwrap_or(track),
                _ => track,
            };
            match track.kind() {
                TrackKind::Audio => track.set_enabled(!self.muted),
                TrackKind::Video => track.set_enabled(self.camera_on),
            }
            link.add_track(track).await?;
        }
        Ok(())
    }

    /// Flips the audio senders. Returns `None` when there is nothing to mute.
    pub async fn toggle_mute(&mut self, link: &dyn PeerLink) -> Option<bool> {
        let senders = link.senders().await;
        if senders.is_empty() {
            return None;
        }
        self.muted = !self.muted;
        for sender in senders.iter().filter(|s| s.kind == TrackKind::Audio) {
            sender.track.set_enabled(!self.muted);
        }
        info!(muted = self.muted, "Toggled microphone");
        Some(self.muted)
    }

    /// Flips the video senders. Returns `None` when there is nothing to switch.
    pub async fn toggle_camera(&mut self, link: &dyn PeerLink) -> Option<bool> {
        let senders = link.senders().await;
        if senders.is_empty() {
            return None;
        }
        self.camera_on = !self.camera_on;
        for sender in senders.iter().filter(|s| s.kind == TrackKind::Video) {
            sender.track.set_enabled(self.camera_on);
        }
        info!(camera_on = self.camera_on, "Toggled camera");
        Some(self.camera_on)
    }

    pub async fn toggle_screen_share(&mut self, link: &dyn PeerLink, stream_id: &str) -> Result<()> {
        if self.screen.is_some() {
            self.stop_screen_share(link).await
        } else {
            self.start_screen_share(link, stream_id).await
        }
    }

    /// Swaps the outgoing video for a screen capture on the same sender, or
    /// adds it when no video sender exists yet.
    pub async fn start_screen_share(&mut self, link: &dyn PeerLink, stream_id: &str) -> Result<()> {
        let screen = self.devices.display_media(stream_id).await?;
        let video = screen
            .track(TrackKind::Video)
            .ok_or_else(|| Error::Media("display capture produced no video track".to_string()))?;
        video.set_enabled(self.camera_on);

        if !link.replace_track(TrackKind::Video, video).await? {
            link.add_track(video).await?;
        }
        info!("Screen sharing started");
        self.screen = Some(screen);
        Ok(())
    }

    pub async fn stop_screen_share(&mut self, link: &dyn PeerLink) -> Result<()> {
        let Some(screen) = self.screen.take() else {
            return Ok(());
        };
        screen.stop();
        if let Some(video) = self.camera.as_ref().and_then(|c| c.track(TrackKind::Video)) {
            video.set_enabled(self.camera_on);
            link.replace_track(TrackKind::Video, video).await?;
        }
        info!("Screen sharing stopped");
        Ok(())
    }

    /// Starts or stops recording the local stream. Stopping returns the
    /// path of the written file, if the recorder produced any data.
    pub async fn toggle_recording(&mut self) -> Result<Option<PathBuf>> {
        if self.recording.is_some() {
            self.stop_recording().await
        } else {
            self.start_recording().await.map(|_| None)
        }
    }

    pub async fn start_recording(&mut self) -> Result<()> {
        if self.recording.is_some() {
            return Ok(());
        }
        let stream = self
            .camera
            .as_ref()
            .ok_or_else(|| Error::Media("no local stream to record".to_string()))?;
        let recorder = self.devices.recorder(stream).await?;
        info!(stream_id = stream.id(), "Recording started");
        self.recording = Some(ActiveRecording {
            recorder,
            started: Instant::now(),
        });
        Ok(())
    }

    pub async fn stop_recording(&mut self) -> Result<Option<PathBuf>> {
        let Some(active) = self.recording.take() else {
            return Ok(None);
        };
        let elapsed = format_elapsed(active.started.elapsed());
        let chunks = active.recorder.finish().await?;
        if chunks.is_empty() {
            info!(elapsed = %elapsed, "Recording stopped without data");
            return Ok(None);
        }
        let path = write_recording(&self.recording_dir, &chunks).await?;
        info!(elapsed = %elapsed, path = %path.display(), "Recording saved");
        Ok(Some(path))
    }

    pub fn recording_elapsed(&self) -> Option<String> {
        self.recording
            .as_ref()
            .map(|r| format_elapsed(r.started.elapsed()))
    }

    /// Stops capture and any recording. Used when leaving the call.
    pub async fn release(&mut self) {
        if let Err(e) = self.stop_recording().await {
            warn!("Could not finish recording: {}", e);
        }
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if let Some(camera) = self.camera.take() {
            debug!(stream_id = camera.id(), "Releasing local media");
            camera.stop();
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_camera_on(&self) -> bool {
        self.camera_on
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }
}

async fn write_recording(dir: &Path, chunks: &[Bytes]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(RECORDING_FILE_NAME);
    let blob: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
    tokio::fs::write(&path, blob).await?;
    Ok(path)
}
