//! Rooms and the participants admitted into them
//!
//! A [`Room`] owns the outbound queue of every participant it admits. All
//! membership changes and relays for one room go through a single mutex, so
//! capacity checks and admissions can never interleave.

use crate::error::SignalingError;
use crate::protocol::{Notice, PeerInfo, ServerEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound half of a participant's connection.
pub type PeerSender = mpsc::Sender<ServerEvent>;

/// Room identifier
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// A fresh URL-safe id: the simple (hex, no dashes) form of a v4 UUID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Participant identifier, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ParticipantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which side originates the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

/// A participant as seen by its own connection.
///
/// Holds the room's id rather than the room itself; the registry alone
/// decides how long a room lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub role: Role,
    pub room_id: RoomId,
}

/// A participant as seen by the room
pub(crate) struct Member {
    pub(crate) id: ParticipantId,
    pub(crate) role: Role,
    pub(crate) tx: PeerSender,
}

impl Member {
    fn info(&self) -> PeerInfo {
        PeerInfo {
            participant_id: self.id,
            role: self.role,
        }
    }
}

/// Everything guarded by a room's lock
pub(crate) struct RoomState {
    /// In admission order
    pub(crate) members: Vec<Member>,
    /// Set once the room has been emptied or reaped; a closed room admits nobody.
    pub(crate) closed: bool,
}

impl RoomState {
    pub(crate) fn is_member(&self, id: ParticipantId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    /// Remove a member and tell everyone left behind.
    ///
    /// Does not close the room; callers decide what an empty room means.
    pub(crate) fn remove_member(&mut self, id: ParticipantId) -> Option<Member> {
        let index = self.members.iter().position(|m| m.id == id)?;
        let member = self.members.remove(index);
        self.deliver(&ServerEvent::Notice(Notice::PeerLeft { participant_id: id }), None);
        Some(member)
    }

    /// Queue `event` for every member except `skip`.
    ///
    /// A member whose queue is closed or full is evicted, and its departure
    /// is announced to the rest in turn. Nothing is retried or buffered.
    pub(crate) fn deliver(&mut self, event: &ServerEvent, skip: Option<ParticipantId>) -> Delivery {
        let mut delivered = 0;
        let mut evicted = Vec::new();
        self.members.retain(|member| {
            if Some(member.id) == skip {
                return true;
            }
            match member.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(e) => {
                    warn!("Evicting {}: {}", member.id, e);
                    evicted.push(member.id);
                    false
                }
            }
        });

        // a member is evicted at most once, so the worklist is bounded
        let mut announced = 0;
        while announced < evicted.len() {
            let gone = evicted[announced];
            announced += 1;
            let notice = ServerEvent::Notice(Notice::PeerLeft { participant_id: gone });
            self.members.retain(|member| match member.tx.try_send(notice.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Evicting {}: {}", member.id, e);
                    evicted.push(member.id);
                    false
                }
            });
        }

        Delivery { delivered, evicted }
    }
}

/// Outcome of [`RoomState::deliver`]
#[derive(Debug)]
pub(crate) struct Delivery {
    /// Members that accepted the event
    pub(crate) delivered: usize,
    /// Members dropped because their queue was closed or full
    pub(crate) evicted: Vec<ParticipantId>,
}

/// Point-in-time view of a room
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
    pub participants: Vec<PeerInfo>,
    pub capacity: usize,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Result of admitting a connection into a room
#[derive(Debug, Clone)]
pub struct Admission {
    pub participant: Participant,
    /// Members that were already present, in admission order
    pub peers: Vec<PeerInfo>,
}

/// A named group of participants
pub struct Room {
    id: RoomId,
    capacity: usize,
    created_at: DateTime<Utc>,
    opened_at: Instant,
    state: Mutex<RoomState>,
}

impl Room {
    pub(crate) fn new(id: RoomId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            created_at: Utc::now(),
            opened_at: Instant::now(),
            state: Mutex::new(RoomState {
                members: Vec::with_capacity(capacity),
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn participant_count(&self) -> usize {
        self.lock().members.len()
    }

    pub fn is_full(&self) -> bool {
        self.participant_count() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_member(&self, id: ParticipantId) -> bool {
        self.lock().is_member(id)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let state = self.lock();
        RoomSnapshot {
            room_id: self.id.clone(),
            participants: state.members.iter().map(Member::info).collect(),
            capacity: self.capacity,
            created_at: self.created_at,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock()
    }

    /// Check capacity and admit in one critical section.
    ///
    /// The new member is the initiator unless an initiator is already
    /// present. Existing members are sent a `peer-joined` notice; any that
    /// cannot take it are evicted before the newcomer is added.
    pub(crate) fn admit(&self, tx: PeerSender) -> Result<Admission, SignalingError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SignalingError::RoomNotFound);
        }
        if state.members.len() >= self.capacity {
            return Err(SignalingError::RoomFull);
        }

        let id = ParticipantId::new();
        let role = initial_role(&state.members);
        let event = ServerEvent::Notice(Notice::PeerJoined {
            participant_id: id,
            role,
        });
        let delivery = state.deliver(&event, None);
        if !delivery.evicted.is_empty() {
            debug!(
                "Admitting {} to {} evicted {} unreachable member(s)",
                id,
                self.id,
                delivery.evicted.len()
            );
        }
        // evictions may have taken the initiator with them
        let role = if delivery.evicted.is_empty() {
            role
        } else {
            initial_role(&state.members)
        };

        let peers = state.members.iter().map(Member::info).collect();
        let participant = Participant {
            id,
            role,
            room_id: self.id.clone(),
        };
        state.members.push(Member { id, role, tx });

        Ok(Admission { participant, peers })
    }

    /// Remove a participant. Returns `None` if it was not a member, otherwise
    /// whether the room is now empty (and therefore closed).
    pub(crate) fn remove(&self, id: ParticipantId) -> Option<bool> {
        let mut state = self.lock();
        state.remove_member(id)?;
        let emptied = state.members.is_empty();
        if emptied {
            state.closed = true;
        }
        Some(emptied)
    }

    /// Close the room if nobody is in it and it is at least `ttl` old.
    pub(crate) fn close_if_unclaimed(&self, ttl: Duration, now: Instant) -> bool {
        let mut state = self.lock();
        if state.closed {
            return true;
        }
        if state.members.is_empty() && now.saturating_duration_since(self.opened_at) >= ttl {
            state.closed = true;
            return true;
        }
        false
    }
}

fn initial_role(members: &[Member]) -> Role {
    if members.iter().any(|m| m.role == Role::Initiator) {
        Role::Responder
    } else {
        Role::Initiator
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("participants", &self.participant_count())
            .finish()
    }
}
