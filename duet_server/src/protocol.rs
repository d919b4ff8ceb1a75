//! JSON wire protocol spoken over the real-time channel
//!
//! Every frame is a JSON text message carrying a `type` field. Signal
//! envelopes are relayed verbatim; their `payload` is never inspected.

use crate::error::{ClientRequestError, SignalingError};
use crate::room::{ParticipantId, Role, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kinds of signaling message that may be relayed between peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    #[serde(alias = "iceCandidate")]
    Candidate,
    /// Graceful departure; the sender leaves the room after it is relayed
    #[serde(alias = "bye")]
    Leave,
}

/// A signaling message, forwarded as an atomic unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: SignalKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// Requests handled by the server itself rather than relayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlRequest {
    Join {
        #[serde(rename = "roomID")]
        room_id: RoomId,
    },
}

/// Any frame a client may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Signal(Envelope),
    Control(ControlRequest),
}

/// Public description of a room member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    #[serde(rename = "participantID")]
    pub participant_id: ParticipantId,
    pub role: Role,
}

/// Server-originated notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notice {
    /// Sent to a connection when it is admitted into a room
    Joined {
        #[serde(rename = "roomID")]
        room_id: RoomId,
        #[serde(rename = "participantID")]
        participant_id: ParticipantId,
        role: Role,
        peers: Vec<PeerInfo>,
    },
    PeerJoined {
        #[serde(rename = "participantID")]
        participant_id: ParticipantId,
        role: Role,
    },
    PeerLeft {
        #[serde(rename = "participantID")]
        participant_id: ParticipantId,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Any frame the server may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerEvent {
    Signal(Envelope),
    Notice(Notice),
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notice(Notice::Error {
            code: code.into(),
            message: message.into(),
        })
    }
}

impl From<&SignalingError> for ServerEvent {
    fn from(err: &SignalingError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

impl From<&ClientRequestError> for ServerEvent {
    fn from(err: &ClientRequestError) -> Self {
        let code = match err {
            ClientRequestError::Json(_) => "INVALID_MESSAGE",
            ClientRequestError::UnsupportedType => "UNSUPPORTED_TYPE",
            ClientRequestError::AlreadyJoined(_) => "ALREADY_JOINED",
            ClientRequestError::Close => "CLOSED",
        };
        Self::error(code, err.to_string())
    }
}

macro_rules! json_frame {
    ($($ty:ty),*) => {$(
        impl FromStr for $ty {
            type Err = serde_json::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                serde_json::from_str(s)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    )*};
}

json_frame!(Envelope, ClientMessage, ServerEvent);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_signal_envelopes() {
        let msg: ClientMessage = r#"{"type":"offer","payload":{"sdp":"v=0"}}"#.parse().unwrap();
        assert_eq!(
            msg,
            ClientMessage::Signal(Envelope::new(SignalKind::Offer, json!({"sdp": "v=0"})))
        );
    }

    #[test]
    fn accepts_browser_aliases() {
        let msg: ClientMessage = r#"{"type":"iceCandidate","payload":"c"}"#.parse().unwrap();
        assert_eq!(
            msg,
            ClientMessage::Signal(Envelope::new(SignalKind::Candidate, json!("c")))
        );

        let msg: ClientMessage = r#"{"type":"bye"}"#.parse().unwrap();
        assert_eq!(
            msg,
            ClientMessage::Signal(Envelope::new(SignalKind::Leave, Value::Null))
        );
    }

    #[test]
    fn parses_join_requests() {
        let msg: ClientMessage = r#"{"type":"join","roomID":"abc123"}"#.parse().unwrap();
        assert_eq!(
            msg,
            ClientMessage::Control(ControlRequest::Join {
                room_id: RoomId::from("abc123")
            })
        );
    }

    #[test]
    fn rejects_unknown_types() {
        assert!(r#"{"type":"renegotiate","payload":1}"#.parse::<ClientMessage>().is_err());
        assert!("not json".parse::<ClientMessage>().is_err());
    }

    #[test]
    fn relayed_envelopes_keep_their_shape() {
        let payload = json!({"candidate": "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host"});
        let event = ServerEvent::Signal(Envelope::new(SignalKind::Candidate, payload.clone()));
        let wire: Value = serde_json::from_str(&event.to_string()).unwrap();
        assert_eq!(wire, json!({"type": "candidate", "payload": payload}));
    }

    #[test]
    fn notices_are_tagged() {
        let id = ParticipantId::new();
        let event = ServerEvent::Notice(Notice::PeerJoined {
            participant_id: id,
            role: Role::Responder,
        });
        let wire: Value = serde_json::from_str(&event.to_string()).unwrap();
        assert_eq!(
            wire,
            json!({"type": "peer-joined", "participantID": id.to_string(), "role": "responder"})
        );

        let parsed: ServerEvent = event.to_string().parse().unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn errors_carry_codes() {
        let event = ServerEvent::from(&SignalingError::RoomFull);
        assert_eq!(event, ServerEvent::error("ROOM_FULL", "room is full"));
    }
}
