use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::connection::IceState;
use crate::error::{Error, Result};
use crate::media::{LocalTrack, TrackKind};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use crate::transport::{OutboundSender, PeerFactory, PeerLink, TransportEvent, TransportSink};

/// Creates webrtc-rs peer connections.
pub struct RtcPeerFactory {
    ice_servers: Vec<String>,
}

impl RtcPeerFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, sink: TransportSink) -> Result<Arc<dyn PeerLink>> {
        // Create a MediaEngine object to configure the supported codecs
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);
        let epoch = sink.epoch();

        let candidates = sink.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidates.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        sink.emit(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Could not encode local candidate: {}", e),
                }
            })
        }));

        let tracks = sink.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let sink = tracks.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        _ => return,
                    };
                    let stream_id = track.stream_id();
                    info!(stream_id = %stream_id, %kind, "Remote track arrived");
                    sink.emit(TransportEvent::StreamAdded {
                        stream_id: stream_id.clone(),
                        kind,
                    });

                    // The track ends when its RTP stream does.
                    tokio::spawn(async move {
                        while track.read_rtp().await.is_ok() {}
                        sink.emit(TransportEvent::StreamRemoved { stream_id });
                    });
                })
            },
        ));

        let negotiation = sink.clone();
        peer_connection.on_negotiation_needed(Box::new(move || {
            let sink = negotiation.clone();
            Box::pin(async move {
                sink.emit(TransportEvent::NegotiationNeeded);
            })
        }));

        let ice = sink.clone();
        peer_connection.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let sink = ice.clone();
            Box::pin(async move {
                info!(epoch, "ICE Connection State has changed: {}", s);
                sink.emit(TransportEvent::IceStateChanged(IceState::from(s)));
            })
        }));

        peer_connection.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            Box::pin(async move {
                debug!(epoch, "Peer Connection State has changed: {}", s);
            })
        }));

        Ok(Arc::new(RtcPeerLink {
            peer_connection,
            senders: Mutex::new(Vec::new()),
        }))
    }
}

pub struct RtcPeerLink {
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<Vec<(Arc<RTCRtpSender>, LocalTrack)>>,
}

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let kind = desc.kind;
    let parsed = match kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| Error::Negotiation(format!("invalid {} description: {}", kind, e)))
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP has to be read for the interceptors to work.
        let rtcp = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtcp.read(&mut rtcp_buf).await.is_ok() {}
        });

        self.senders.lock().await.push((sender, track.clone()));
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool> {
        let mut senders = self.senders.lock().await;
        let Some(entry) = senders.iter_mut().find(|(_, t)| t.kind() == kind) else {
            return Ok(false);
        };
        entry
            .0
            .replace_track(Some(track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>))
            .await?;
        entry.1 = track.clone();
        Ok(true)
    }

    async fn receive_only(&self, kind: TrackKind) -> Result<()> {
        self.peer_connection
            .add_transceiver_from_kind(
                codec_type(kind),
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }

    async fn senders(&self) -> Vec<OutboundSender> {
        self.senders
            .lock()
            .await
            .iter()
            .map(|(_, track)| OutboundSender {
                kind: track.kind(),
                track: track.clone(),
            })
            .collect()
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc(desc)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(desc)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let candidate_init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection.add_ice_candidate(candidate_init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
