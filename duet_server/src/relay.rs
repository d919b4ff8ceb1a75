//! Forwarding signaling messages between members of a room

use crate::error::SignalingError;
use crate::protocol::{Envelope, ServerEvent};
use crate::registry::RoomRegistry;
use crate::room::{ParticipantId, Room, RoomId};
use tracing::{debug, warn};

impl Room {
    /// Deliver `envelope` to every member except the sender.
    ///
    /// Runs under the room lock, so one sender's messages reach each peer's
    /// queue in the order they were relayed. Delivery is a non-blocking
    /// `try_send`; a recipient whose queue is closed or full is evicted and
    /// reported back to the caller.
    pub(crate) fn relay_from(
        &self,
        sender: ParticipantId,
        envelope: &Envelope,
    ) -> Result<usize, SignalingError> {
        let mut state = self.lock();
        if !state.is_member(sender) {
            return Err(SignalingError::NotAMember);
        }

        let delivery = state.deliver(&ServerEvent::Signal(envelope.clone()), Some(sender));
        if let Some(&participant) = delivery.evicted.first() {
            warn!(
                "{:?} from {} in room {} not delivered to {}",
                envelope.kind,
                sender,
                self.id(),
                participant
            );
            return Err(SignalingError::DeliveryFailed { participant });
        }
        let delivered = delivery.delivered;
        if delivered == 0 {
            return Err(SignalingError::PeerNotConnected);
        }
        Ok(delivered)
    }
}

impl RoomRegistry {
    /// Relay a message from `sender` to the other members of `room_id`.
    ///
    /// Returns the number of recipients reached.
    pub fn relay(
        &self,
        room_id: &RoomId,
        sender: ParticipantId,
        envelope: &Envelope,
    ) -> Result<usize, SignalingError> {
        let room = self
            .get_room(room_id)
            .map_err(|_| SignalingError::NotAMember)?;
        let result = room.relay_from(sender, envelope);
        match &result {
            Ok(n) => debug!(
                "Relayed {:?} from {} to {} peer(s) in {}",
                envelope.kind, sender, n, room_id
            ),
            Err(e) => debug!(
                "Relay of {:?} from {} in {} failed: {}",
                envelope.kind, sender, room_id, e
            ),
        }
        result
    }
}
