//! Process-wide room registry
//!
//! Maps room ids to rooms. The map itself is sharded, so different rooms never
//! contend; everything that touches a room's membership goes through that
//! room's own lock. The map is never locked while a room lock is held.

use crate::config::ServerConfig;
use crate::error::SignalingError;
use crate::room::{Admission, ParticipantId, PeerSender, Room, RoomId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How many fresh ids to try before giving up on allocation
const MAX_ALLOCATION_ATTEMPTS: usize = 16;

/// All live rooms
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    capacity: usize,
    unclaimed_ttl: Duration,
}

impl RoomRegistry {
    pub fn new(capacity: usize, unclaimed_ttl: Duration) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity,
            unclaimed_ttl,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.room_capacity, config.unclaimed_room_ttl)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Create an empty room under a fresh id.
    ///
    /// Fails with `AllocationExhausted` only if every attempted id collided,
    /// which does not happen with v4 UUIDs in practice.
    pub fn create_room(&self) -> Result<RoomId, SignalingError> {
        self.create_room_with(RoomId::generate)
    }

    fn create_room_with(
        &self,
        mut next_id: impl FnMut() -> RoomId,
    ) -> Result<RoomId, SignalingError> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let id = next_id();
            if let Entry::Vacant(slot) = self.rooms.entry(id.clone()) {
                slot.insert(Arc::new(Room::new(id.clone(), self.capacity)));
                info!("Room {} created", id);
                return Ok(id);
            }
            debug!("Room id {} already taken", id);
        }
        warn!(
            "Gave up allocating a room id after {} attempts",
            MAX_ALLOCATION_ATTEMPTS
        );
        Err(SignalingError::AllocationExhausted)
    }

    /// Clone the room out of the map so no shard lock outlives this call.
    fn lookup(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_room(&self, id: &RoomId) -> Result<Arc<Room>, SignalingError> {
        self.lookup(id)
            .filter(|room| !room.is_closed())
            .ok_or(SignalingError::RoomNotFound)
    }

    /// Fail fast with the error a join would produce right now.
    ///
    /// Advisory only: [`join_room`](Self::join_room) repeats the check
    /// atomically.
    pub fn check_joinable(&self, id: &RoomId) -> Result<(), SignalingError> {
        let room = self.get_room(id)?;
        if room.is_full() {
            return Err(SignalingError::RoomFull);
        }
        Ok(())
    }

    /// Admit a connection into a room.
    ///
    /// The room takes ownership of `conn`; messages for this participant are
    /// delivered through it until it leaves or is evicted.
    pub fn join_room(&self, id: &RoomId, conn: PeerSender) -> Result<Admission, SignalingError> {
        let room = self.lookup(id).ok_or(SignalingError::RoomNotFound)?;
        let admission = room.admit(conn)?;
        info!(
            "Participant {} joined room {} as {:?}",
            admission.participant.id, id, admission.participant.role
        );
        Ok(admission)
    }

    /// Remove a participant; drops the room once nobody is left.
    ///
    /// Returns whether the participant was a member.
    pub fn leave_room(&self, id: &RoomId, participant: ParticipantId) -> bool {
        let Some(room) = self.lookup(id) else {
            return false;
        };
        match room.remove(participant) {
            None => false,
            Some(emptied) => {
                info!("Participant {} left room {}", participant, id);
                if emptied {
                    self.discard(&room);
                }
                true
            }
        }
    }

    /// Remove a closed room from the map, unless the id now names another room.
    fn discard(&self, room: &Arc<Room>) {
        if self
            .rooms
            .remove_if(room.id(), |_, current| Arc::ptr_eq(current, room))
            .is_some()
        {
            info!("Room {} removed", room.id());
        }
    }

    /// Drop every room that nobody has joined within the unclaimed TTL.
    pub fn reap_unclaimed(&self, now: Instant) -> usize {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut reaped = 0;
        for room in rooms {
            if room.close_if_unclaimed(self.unclaimed_ttl, now) {
                debug!("Reaping unclaimed room {}", room.id());
                self.discard(&room);
                reaped += 1;
            }
        }
        reaped
    }

    /// Periodically reap unclaimed rooms until the registry is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let now = ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let reaped = registry.reap_unclaimed(now);
                if reaped > 0 {
                    info!("Reaped {} unclaimed rooms", reaped);
                }
            }
        })
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn participant_count(&self) -> usize {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        rooms.iter().map(|room| room.participant_count()).sum()
    }
}
