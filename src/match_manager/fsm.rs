//! The room state-machine transition primitive.
//!
//! [`super::MatchManager`]'s trigger methods are the only callers; this
//! module just enforces that a transition is legal before it happens, so
//! an illegal transition never silently changes `room.state`.

use crate::error::{CoreError, CoreResult};

use super::room::{MatchRoom, RoomState};

/// Transitions `room` to `next` if [`RoomState::allows`] permits it,
/// otherwise returns [`CoreError::InvalidTransition`] and leaves the room
/// untouched: no room is ever in two FSM states at once.
pub fn transition(room: &mut MatchRoom, next: RoomState) -> CoreResult<()> {
    if !room.state.allows(next) {
        return Err(CoreError::InvalidTransition {
            from: format!("{:?}", room.state),
            to: format!("{next:?}"),
        });
    }
    room.state = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_manager::room::PlayerConnection;
    use crate::money::Money;
    use uuid::Uuid;

    fn room() -> MatchRoom {
        MatchRoom::new(Uuid::new_v4(), "ludo", Money::from_i64(10), vec![])
    }

    #[test]
    fn illegal_transition_leaves_state_untouched() {
        let mut r = room();
        let err = transition(&mut r, RoomState::InProgress).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(r.state, RoomState::Matchmaking);
    }

    #[test]
    fn legal_transition_applies() {
        let mut r = room();
        transition(&mut r, RoomState::Locked).unwrap();
        assert_eq!(r.state, RoomState::Locked);
        let _ = PlayerConnection::house_bot(Uuid::new_v4());
    }
}
