use std::collections::HashMap;

use super::state::{ConnId, RoomId, SessionId};

/// Maps `(room, session)` to the connection currently speaking for that
/// session. A newer connection always wins.
#[derive(Debug, Default)]
pub struct SessionDeduplicator {
    bindings: HashMap<(RoomId, SessionId), ConnId>,
}

impl SessionDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the session to `new_conn` and returns the connection it displaced,
    /// if any. The caller is responsible for tearing that connection down.
    pub fn resolve(
        &mut self,
        room_id: &RoomId,
        session_id: &SessionId,
        new_conn: &ConnId,
    ) -> Option<ConnId> {
        let previous = self
            .bindings
            .insert((room_id.clone(), session_id.clone()), new_conn.clone());
        previous.filter(|old| old != new_conn)
    }

    pub fn bound(&self, room_id: &RoomId, session_id: &SessionId) -> Option<&ConnId> {
        self.bindings.get(&(room_id.clone(), session_id.clone()))
    }

    /// Drops the binding only if it still points at `conn_id`, so a stale
    /// connection's cleanup never unbinds its successor.
    pub fn release(&mut self, room_id: &RoomId, session_id: &SessionId, conn_id: &ConnId) -> bool {
        let key = (room_id.clone(), session_id.clone());
        if self.bindings.get(&key) == Some(conn_id) {
            self.bindings.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
