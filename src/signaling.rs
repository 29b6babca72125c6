use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// An offer or answer, in the `{type, sdp}` shape browsers exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind == SdpKind::Offer
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// Payload relayed between the two peers of a room.
///
/// On the wire this is a JSON object with exactly one populated key, e.g.
/// `{"sdp": {...}}` or `{"limitReached": true}`. Objects with no key or
/// several keys are rejected when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WirePayload", into = "WirePayload")]
pub enum SignalingMessage {
    Sdp(SessionDescription),
    Candidate(IceCandidate),
    Left,
    LimitReached,
}

impl SignalingMessage {
    pub fn label(&self) -> &'static str {
        match self {
            SignalingMessage::Sdp(_) => "sdp",
            SignalingMessage::Candidate(_) => "candidate",
            SignalingMessage::Left => "left",
            SignalingMessage::LimitReached => "limitReached",
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,
    #[serde(default, skip_serializing_if = "is_false")]
    left: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    limit_reached: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl TryFrom<WirePayload> for SignalingMessage {
    type Error = String;

    fn try_from(wire: WirePayload) -> Result<Self, Self::Error> {
        let populated = usize::from(wire.sdp.is_some())
            + usize::from(wire.candidate.is_some())
            + usize::from(wire.left)
            + usize::from(wire.limit_reached);
        if populated != 1 {
            return Err(format!(
                "signaling payload must carry exactly one field, found {}",
                populated
            ));
        }

        if let Some(sdp) = wire.sdp {
            Ok(SignalingMessage::Sdp(sdp))
        } else if let Some(candidate) = wire.candidate {
            Ok(SignalingMessage::Candidate(candidate))
        } else if wire.left {
            Ok(SignalingMessage::Left)
        } else {
            Ok(SignalingMessage::LimitReached)
        }
    }
}

impl From<SignalingMessage> for WirePayload {
    fn from(msg: SignalingMessage) -> Self {
        match msg {
            SignalingMessage::Sdp(sdp) => WirePayload {
                sdp: Some(sdp),
                ..Default::default()
            },
            SignalingMessage::Candidate(candidate) => WirePayload {
                candidate: Some(candidate),
                ..Default::default()
            },
            SignalingMessage::Left => WirePayload {
                left: true,
                ..Default::default()
            },
            SignalingMessage::LimitReached => WirePayload {
                limit_reached: true,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_browser_shaped_payloads() {
        let left = serde_json::to_value(SignalingMessage::Left).unwrap();
        assert_eq!(left, json!({ "left": true }));

        let full = serde_json::to_value(SignalingMessage::LimitReached).unwrap();
        assert_eq!(full, json!({ "limitReached": true }));

        let offer = serde_json::to_value(SignalingMessage::Sdp(SessionDescription::offer("v=0")))
            .unwrap();
        assert_eq!(offer, json!({ "sdp": { "type": "offer", "sdp": "v=0" } }));
    }

    #[test]
    fn decodes_candidate_from_browser_json() {
        let raw = r#"{"candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            SignalingMessage::Candidate(c) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn rejects_ambiguous_or_empty_payloads() {
        assert!(serde_json::from_str::<SignalingMessage>("{}").is_err());
        assert!(serde_json::from_str::<SignalingMessage>(r#"{"left":false}"#).is_err());
        assert!(serde_json::from_str::<SignalingMessage>(
            r#"{"left":true,"limitReached":true}"#
        )
        .is_err());
    }
}
