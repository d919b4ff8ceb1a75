//! Per-connection state machine
//!
//! ```text
//! Connecting ──join──▶ Joined ──leave / close / eviction──▶ Disconnected
//!     │  ▲                                                       ▲
//!     └──┘ failed join                                           │
//!     └──────────────────────── close ───────────────────────────┘
//! ```

use crate::error::{ClientRequestError, SignalingError};
use crate::protocol::{ClientMessage, ControlRequest, Envelope, Notice, ServerEvent, SignalKind};
use crate::registry::RoomRegistry;
use crate::room::{Participant, RoomId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Channel open, not in any room
    Connecting,
    Joined(Participant),
    /// Terminal
    Disconnected,
}

/// What the connection should do after handling a client message
#[derive(Debug, PartialEq)]
pub enum Flow {
    /// Keep going, optionally answering the client
    Continue(Option<ServerEvent>),
    /// The client left; close the channel
    Close,
}

/// One client's view of the signaling service.
///
/// Leaving the room happens on [`disconnect`](Self::disconnect) or on drop,
/// whichever comes first.
pub struct Session {
    registry: Arc<RoomRegistry>,
    outbound_buffer: usize,
    state: ConnectionState,
    outbound: Option<mpsc::Receiver<ServerEvent>>,
}

impl Session {
    pub fn new(registry: Arc<RoomRegistry>, outbound_buffer: usize) -> Self {
        Self {
            registry,
            outbound_buffer,
            state: ConnectionState::Connecting,
            outbound: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn participant(&self) -> Option<&Participant> {
        match &self.state {
            ConnectionState::Joined(participant) => Some(participant),
            _ => None,
        }
    }

    /// Join a room. On success returns the `joined` acknowledgement for the
    /// client; on failure the session stays in `Connecting`.
    pub fn join(&mut self, room_id: &RoomId) -> Result<ServerEvent, SignalingError> {
        if self.state != ConnectionState::Connecting {
            return Err(SignalingError::NotAMember);
        }

        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        let admission = self.registry.join_room(room_id, tx)?;
        let participant = admission.participant;
        let ack = ServerEvent::Notice(Notice::Joined {
            room_id: participant.room_id.clone(),
            participant_id: participant.id,
            role: participant.role,
            peers: admission.peers,
        });

        self.outbound = Some(rx);
        self.state = ConnectionState::Joined(participant);
        Ok(ack)
    }

    pub fn handle_message(&mut self, msg: ClientMessage) -> Flow {
        match msg {
            ClientMessage::Control(ControlRequest::Join { room_id }) => {
                if let Some(current) = self.participant() {
                    let err = ClientRequestError::AlreadyJoined(current.room_id.clone());
                    return Flow::Continue(Some(ServerEvent::from(&err)));
                }
                let reply = match self.join(&room_id) {
                    Ok(ack) => ack,
                    Err(e) => {
                        debug!("Join of {} refused: {}", room_id, e);
                        ServerEvent::from(&e)
                    }
                };
                Flow::Continue(Some(reply))
            }
            ClientMessage::Signal(envelope) => self.handle_signal(envelope),
        }
    }

    fn handle_signal(&mut self, envelope: Envelope) -> Flow {
        let leaving = envelope.kind == SignalKind::Leave;
        let Some(participant) = self.participant() else {
            if leaving {
                self.disconnect();
                return Flow::Close;
            }
            return Flow::Continue(Some(ServerEvent::from(&SignalingError::NotAMember)));
        };

        let result = self
            .registry
            .relay(&participant.room_id, participant.id, &envelope);

        if leaving {
            self.disconnect();
            return Flow::Close;
        }
        match result {
            Ok(_) => Flow::Continue(None),
            Err(e) => Flow::Continue(Some(ServerEvent::from(&e))),
        }
    }

    /// Next message queued for this client by its room.
    ///
    /// Pends forever before a join. `None` means the room dropped this
    /// participant; the caller should disconnect.
    pub async fn next_outbound(&mut self) -> Option<ServerEvent> {
        match self.outbound.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Leave the room, if any, and enter the terminal state. Idempotent.
    pub fn disconnect(&mut self) {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Disconnected);
        self.outbound = None;
        if let ConnectionState::Joined(participant) = previous {
            if self.registry.leave_room(&participant.room_id, participant.id) {
                info!(
                    "Participant {} disconnected from room {}",
                    participant.id, participant.room_id
                );
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
