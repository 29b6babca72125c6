//! Publish/subscribe relay adapter.
//!
//! The relay is a third-party service: clients subscribe to a named room,
//! receive membership snapshots and publish opaque messages that are fanned
//! out to every member, tagged with the publisher's client id.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::room::RoomName;
use crate::signaling::SignalingMessage;

pub type MemberId = String;

/// What the relay tells a subscriber about its room.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Full member list in arrival order, delivered once on subscribe.
    Members(Vec<MemberId>),
    MemberJoined(MemberId),
    MemberLeft(MemberId),
    Data {
        sender: MemberId,
        message: SignalingMessage,
    },
    Error(String),
    Closed,
}

#[async_trait]
pub trait Relay: Send + Sync {
    /// Identity the relay assigned to this client.
    fn client_id(&self) -> &str;

    async fn publish(&self, message: SignalingMessage) -> Result<()>;

    async fn unsubscribe(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
}

/// Frames sent from this client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        room: String,
    },
    Publish {
        room: String,
        message: SignalingMessage,
    },
    Unsubscribe {
        room: String,
    },
}

/// Frames the relay pushes to this client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    Open {
        client_id: MemberId,
    },
    Members {
        room: String,
        members: Vec<Member>,
    },
    MemberJoin {
        room: String,
        member: Member,
    },
    MemberLeave {
        room: String,
        member: Member,
    },
    Data {
        room: String,
        client_id: MemberId,
        message: SignalingMessage,
    },
    Error {
        message: String,
    },
}

impl RelayFrame {
    /// Maps a frame to a room event, dropping frames addressed to other rooms.
    pub fn into_event(self, room: &RoomName) -> Option<RelayEvent> {
        let ours = |name: &str| name == room.as_str();
        match self {
            RelayFrame::Open { .. } => None,
            RelayFrame::Members { room, members } if ours(room.as_str()) => Some(RelayEvent::Members(
                members.into_iter().map(|m| m.id).collect(),
            )),
            RelayFrame::MemberJoin { room, member } if ours(room.as_str()) => {
                Some(RelayEvent::MemberJoined(member.id))
            }
            RelayFrame::MemberLeave { room, member } if ours(room.as_str()) => {
                Some(RelayEvent::MemberLeft(member.id))
            }
            RelayFrame::Data {
                room,
                client_id,
                message,
            } if ours(room.as_str()) => Some(RelayEvent::Data {
                sender: client_id,
                message,
            }),
            RelayFrame::Error { message } => Some(RelayEvent::Error(message)),
            _ => None,
        }
    }
}

/// Relay reached over a WebSocket carrying JSON text frames.
///
/// One socket per client keeps delivery FIFO per sender.
pub struct WsRelay {
    client_id: MemberId,
    room: RoomName,
    tx: mpsc::Sender<ClientFrame>,
}

impl WsRelay {
    pub async fn connect(url: &str, room: RoomName) -> Result<(Self, mpsc::Receiver<RelayEvent>)> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        // The relay greets every socket with its client id before anything else.
        let client_id = loop {
            let msg = read.next().await.ok_or(Error::RelayClosed)??;
            if !msg.is_text() {
                continue;
            }
            match serde_json::from_str::<RelayFrame>(msg.to_text()?)? {
                RelayFrame::Open { client_id } => break client_id,
                RelayFrame::Error { message } => return Err(Error::Signaling(message)),
                other => debug!("Ignoring frame before open: {:?}", other),
            }
        };
        info!(client_id = %client_id, room = %room, "Connected to relay");

        let (tx, rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ClientFrame>(100);

        // Handle outgoing frames
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if let Err(e) = write.send(Message::Text(json)).await {
                            warn!("Relay write failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => warn!("Could not encode relay frame: {}", e),
                }
            }
            let _ = write.close().await;
        });

        // Handle incoming frames
        let reader_room = room.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        let _ = tx.send(RelayEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if msg.is_close() {
                    break;
                }
                if !msg.is_text() {
                    continue;
                }
                let Ok(text) = msg.to_text() else { continue };
                match serde_json::from_str::<RelayFrame>(text) {
                    Ok(frame) => {
                        if let Some(event) = frame.into_event(&reader_room) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(RelayEvent::Error(format!("undecodable relay frame: {}", e)))
                            .await;
                    }
                }
            }
            let _ = tx.send(RelayEvent::Closed).await;
        });

        outgoing_tx
            .send(ClientFrame::Subscribe {
                room: room.to_string(),
            })
            .await
            .map_err(|_| Error::RelayClosed)?;

        Ok((
            Self {
                client_id,
                room,
                tx: outgoing_tx,
            },
            rx,
        ))
    }

    async fn send(&self, frame: ClientFrame) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| Error::RelayClosed)
    }
}

#[async_trait]
impl Relay for WsRelay {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, message: SignalingMessage) -> Result<()> {
        self.send(ClientFrame::Publish {
            room: self.room.to_string(),
            message,
        })
        .await
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.send(ClientFrame::Unsubscribe {
            room: self.room.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomName {
        RoomName::resolve(Some("abc"))
    }

    #[test]
    fn data_frame_becomes_tagged_event() {
        let raw = r#"{"type":"data","room":"observable-abc","client_id":"peer-b","message":{"left":true}}"#;
        let frame: RelayFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame.into_event(&room()),
            Some(RelayEvent::Data {
                sender: "peer-b".to_string(),
                message: SignalingMessage::Left,
            })
        );
    }

    #[test]
    fn members_frame_keeps_arrival_order() {
        let raw = r#"{"type":"members","room":"observable-abc","members":[{"id":"a"},{"id":"b"}]}"#;
        let frame: RelayFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame.into_event(&room()),
            Some(RelayEvent::Members(vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn frames_for_other_rooms_are_dropped() {
        let frame = RelayFrame::MemberJoin {
            room: "observable-other".to_string(),
            member: Member { id: "x".to_string() },
        };
        assert_eq!(frame.into_event(&room()), None);
    }

    #[test]
    fn publish_frame_wire_shape() {
        let frame = ClientFrame::Publish {
            room: "observable-abc".to_string(),
            message: SignalingMessage::LimitReached,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "publish",
                "room": "observable-abc",
                "message": { "limitReached": true }
            })
        );
    }
}
