use dashmap::DashMap;
use std::collections::HashSet;
use uuid::Uuid;

/// Why a session is leaving a room. A deliberate leave may be logged and
/// surfaced; disconnect cleanup must stay quiet so reconnect churn does not
/// produce noisy "user left" events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Deliberate,
    Disconnect,
}

/// Scopes event fan-out to the sessions subscribed to a conversation.
/// Membership never outlives the owning session: `on_disconnect` performs
/// the implicit bulk leave.
pub struct RoomManager {
    rooms: DashMap<i64, HashSet<Uuid>>,
    /// Reverse index: session -> rooms it joined, for disconnect cleanup.
    sessions: DashMap<Uuid, HashSet<i64>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Idempotent join; returns false if the session was already a member.
    pub fn join(&self, session_id: Uuid, room_id: i64) -> bool {
        let newly = self.rooms.entry(room_id).or_default().insert(session_id);
        if newly {
            self.sessions.entry(session_id).or_default().insert(room_id);
            tracing::debug!(%session_id, room_id, "session joined room");
        }
        newly
    }

    /// Idempotent leave; returns false if the session was not a member.
    pub fn leave(&self, session_id: Uuid, room_id: i64, reason: LeaveReason) -> bool {
        let removed = self
            .rooms
            .get_mut(&room_id)
            .map(|mut members| members.remove(&session_id))
            .unwrap_or(false);
        if !removed {
            return false;
        }
        self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        if let Some(mut joined) = self.sessions.get_mut(&session_id) {
            joined.remove(&room_id);
        }
        self.sessions
            .remove_if(&session_id, |_, joined| joined.is_empty());

        match reason {
            LeaveReason::Deliberate => {
                tracing::info!(%session_id, room_id, "session deliberately left room")
            }
            LeaveReason::Disconnect => {
                tracing::debug!(%session_id, room_id, "session removed from room on disconnect")
            }
        }
        true
    }

    pub fn members_of(&self, room_id: i64) -> HashSet<Uuid> {
        self.rooms
            .get(&room_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, session_id: Uuid, room_id: i64) -> bool {
        self.rooms
            .get(&room_id)
            .map(|members| members.contains(&session_id))
            .unwrap_or(false)
    }

    /// Implicit bulk leave on transport disconnect. Returns the rooms the
    /// session belonged to.
    pub fn on_disconnect(&self, session_id: Uuid) -> Vec<i64> {
        let joined: Vec<i64> = self
            .sessions
            .remove(&session_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();
        for room_id in &joined {
            if let Some(mut members) = self.rooms.get_mut(room_id) {
                members.remove(&session_id);
            }
            self.rooms.remove_if(room_id, |_, members| members.is_empty());
        }
        if !joined.is_empty() {
            tracing::debug!(%session_id, rooms = joined.len(), "disconnect cleanup left all rooms");
        }
        joined
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let rooms = RoomManager::new();
        let session = Uuid::new_v4();
        assert!(rooms.join(session, 1));
        for _ in 0..5 {
            assert!(!rooms.join(session, 1));
        }
        assert_eq!(rooms.members_of(1).len(), 1);
    }

    #[test]
    fn leave_is_idempotent() {
        let rooms = RoomManager::new();
        let session = Uuid::new_v4();
        rooms.join(session, 1);
        assert!(rooms.leave(session, 1, LeaveReason::Deliberate));
        assert!(!rooms.leave(session, 1, LeaveReason::Deliberate));
        assert!(!rooms.is_member(session, 1));
    }

    #[test]
    fn disconnect_removes_session_from_every_room() {
        let rooms = RoomManager::new();
        let session = Uuid::new_v4();
        let other = Uuid::new_v4();
        rooms.join(session, 1);
        rooms.join(session, 2);
        rooms.join(other, 2);

        let mut left = rooms.on_disconnect(session);
        left.sort_unstable();
        assert_eq!(left, vec![1, 2]);
        assert!(rooms.members_of(1).is_empty());
        assert_eq!(rooms.members_of(2), HashSet::from([other]));
        // Second disconnect is a no-op.
        assert!(rooms.on_disconnect(session).is_empty());
    }
}
