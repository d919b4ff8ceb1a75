//! Error types for the signaling server

use crate::room::{ParticipantId, RoomId};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised by the room registry and the signaling relay.
///
/// All of these are local and recoverable: they are returned to the calling
/// connection or HTTP handler and never take the process down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The room does not exist (never created, or already removed)
    #[error("room does not exist")]
    RoomNotFound,

    /// The room already holds its maximum number of participants
    #[error("room is full")]
    RoomFull,

    /// The sender is not a current member of the room it named
    #[error("connection is not a member of this room")]
    NotAMember,

    /// Nobody else is in the room, the message was dropped
    #[error("no peer is connected")]
    PeerNotConnected,

    /// A fresh room id could not be allocated
    #[error("room id allocation exhausted")]
    AllocationExhausted,

    /// A recipient's outbound queue was closed or full; it has been evicted
    #[error("failed to deliver message to {participant}")]
    DeliveryFailed { participant: ParticipantId },
}

impl SignalingError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::RoomFull => "ROOM_FULL",
            Self::NotAMember => "NOT_A_MEMBER",
            Self::PeerNotConnected => "PEER_NOT_CONNECTED",
            Self::AllocationExhausted => "ALLOCATION_EXHAUSTED",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::RoomNotFound => StatusCode::NOT_FOUND,
            Self::RoomFull | Self::PeerNotConnected => StatusCode::CONFLICT,
            Self::NotAMember => StatusCode::FORBIDDEN,
            Self::AllocationExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeliveryFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Errors from client requests
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// Connection was closed
    #[error("Connection closed")]
    Close,

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unsupported message type
    #[error("Unsupported message type")]
    UnsupportedType,

    /// A join arrived on a connection that is already in a room
    #[error("Already joined room {0}")]
    AlreadyJoined(RoomId),
}

/// Invalid server configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}
