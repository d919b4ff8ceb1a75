//! WebRTC signaling server for two-party video rooms
//!
//! Clients create a room over HTTP, then open a WebSocket to join it. The
//! server pairs the participants of a room and relays the offers, answers
//! and ICE candidates they need to connect to each other directly. Media
//! never passes through the server.
//!
//! # Protocol
//!
//! - **POST /create** - Create a room, returns `{"roomID": "<id>"}`
//! - **GET /join?roomID={id}** - Upgrade to a WebSocket and join the room
//!   (404 if it does not exist, 409 if it is full)
//! - **GET /room/{id}** - Room details
//! - **GET /health** - Health check
//!
//! ## Frames (client → server)
//!
//! - `{"type": "offer" | "answer" | "candidate" | "leave", "payload": ...}` -
//!   relayed verbatim to the other participant
//! - `{"type": "join", "roomID": "<id>"}` - join after connecting to a bare `/join`
//!
//! ## Frames (server → client)
//!
//! - Relayed signal envelopes, unchanged
//! - `{"type": "joined", "roomID", "participantID", "role", "peers"}` - Admitted
//! - `{"type": "peer-joined", "participantID", "role"}` - Someone else joined
//! - `{"type": "peer-left", "participantID"}` - Someone else left
//! - `{"type": "error", "code", "message"}`
//!
//! The first participant is the `initiator` and sends the offer once a peer
//! is present; the second is the `responder`.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! HTTP_PORT=8000 duet-signaling
//!
//! # Create a room
//! curl -X POST http://127.0.0.1:8000/create
//!
//! # Join it (any WebSocket client)
//! websocat "ws://127.0.0.1:8000/join?roomID=<id>"
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod room;
pub mod session;

pub use config::ServerConfig;
pub use error::{ClientRequestError, ConfigError, SignalingError};
pub use handler::{AppState, create_router};
pub use protocol::{ClientMessage, Envelope, Notice, ServerEvent, SignalKind};
pub use registry::RoomRegistry;
pub use room::{Participant, ParticipantId, Role, Room, RoomId};
pub use session::{ConnectionState, Session};
