//! Room admission policy.

use derive_more::Display;

use crate::storage::Room;

/// Reason a connection is not admitted into a room.
///
/// Surfaced to the client verbatim in an `error` frame before the socket
/// is closed.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum JoinError {
    /// No such room.
    #[display(fmt = "room not found")]
    RoomNotFound,

    /// The room exists but has been deactivated.
    #[display(fmt = "room is not active")]
    RoomClosed,

    /// The room is at its participant cap.
    #[display(fmt = "room full")]
    RoomFull,
}

/// Checks whether one more participant may join `room`, given the current
/// size of its membership set.
///
/// Rules apply in order: the room must exist, must be active and must
/// have spare capacity. Pure over the provided snapshots; the capacity
/// check is therefore advisory under concurrent admissions, which may
/// briefly overshoot the cap by one per in-flight admit.
pub fn can_join(room: Option<&Room>, occupancy: usize) -> Result<(), JoinError> {
    let room = room.ok_or(JoinError::RoomNotFound)?;
    if !room.is_active {
        return Err(JoinError::RoomClosed);
    }
    if occupancy >= room.max_participants {
        return Err(JoinError::RoomFull);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use iris_client_api_proto::{RoomId, UserId};

    use super::*;

    fn room(cap: usize) -> Room {
        Room::new(
            RoomId::from("r1"),
            UserId::from("owner"),
            "title".to_owned(),
            String::new(),
            cap,
        )
    }

    #[test]
    fn unknown_room_is_rejected() {
        assert_eq!(can_join(None, 0), Err(JoinError::RoomNotFound));
    }

    #[test]
    fn inactive_room_is_rejected() {
        let mut room = room(10);
        room.is_active = false;

        assert_eq!(can_join(Some(&room), 0), Err(JoinError::RoomClosed));
    }

    #[test]
    fn full_room_is_rejected() {
        let room = room(2);

        assert_eq!(can_join(Some(&room), 1), Ok(()));
        assert_eq!(can_join(Some(&room), 2), Err(JoinError::RoomFull));
    }
}
