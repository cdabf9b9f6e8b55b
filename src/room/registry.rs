use std::collections::HashMap;

use super::state::{ConnId, Member, Room, RoomId, SessionId, ROOM_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Accepted { became_host: bool, room_created: bool },
    AlreadyMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomFull;

/// What happened to a room when a member left it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub member: Member,
    pub promoted: Option<ConnId>,
    pub room_closed: bool,
}

/// Per-room participant sets and host identity. Holds no transport handles;
/// callers turn the returned outcomes into outbound events.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    conn_rooms: HashMap<ConnId, RoomId>,
    capacity: usize,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(ROOM_CAPACITY)
    }
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            conn_rooms: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn register(
        &mut self,
        room_id: &RoomId,
        conn_id: ConnId,
        session_id: SessionId,
        name: String,
    ) -> Result<Registration, RoomFull> {
        let capacity = self.capacity;
        let room_created = !self.rooms.contains_key(room_id);
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone(), capacity));

        if room.contains(&conn_id) {
            return Ok(Registration::AlreadyMember);
        }
        if room.is_full() {
            return Err(RoomFull);
        }

        let became_host = room.host().is_none();
        if became_host {
            room.set_host(Some(conn_id.clone()));
        }
        room.push(Member {
            conn_id: conn_id.clone(),
            session_id,
            name,
        });
        self.conn_rooms.insert(conn_id, room_id.clone());

        Ok(Registration::Accepted {
            became_host,
            room_created,
        })
    }

    /// Removes a member. If it was the host, the first remaining member is
    /// promoted; an emptied room is deleted.
    pub fn unregister(&mut self, room_id: &RoomId, conn_id: &ConnId) -> Option<Departure> {
        let room = self.rooms.get_mut(room_id)?;
        let member = room.remove(conn_id)?;
        self.conn_rooms.remove(conn_id);

        let mut promoted = None;
        if room.host() == Some(conn_id) {
            let next = room.members().first().map(|m| m.conn_id.clone());
            room.set_host(next.clone());
            promoted = next;
        }

        let room_closed = room.is_empty();
        if room_closed {
            self.rooms.remove(room_id);
        }

        Some(Departure {
            member,
            promoted,
            room_closed,
        })
    }

    /// Puts `member` into the slot held by `old`. Member count is unchanged and
    /// host status moves with the slot.
    pub fn replace(&mut self, room_id: &RoomId, old: &ConnId, member: Member) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let new_conn = member.conn_id.clone();
        if !room.replace(old, member) {
            return false;
        }
        self.conn_rooms.remove(old);
        self.conn_rooms.insert(new_conn, room_id.clone());
        true
    }

    pub fn get_host(&self, room_id: &RoomId) -> Option<&ConnId> {
        self.rooms.get(room_id).and_then(Room::host)
    }

    /// Hands host to an existing member. Returns false if `conn_id` is not in the room.
    pub fn set_host(&mut self, room_id: &RoomId, conn_id: &ConnId) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) if room.contains(conn_id) => {
                room.set_host(Some(conn_id.clone()));
                true
            }
            _ => false,
        }
    }

    pub fn count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, Room::len)
    }

    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_of(&self, conn_id: &ConnId) -> Option<&RoomId> {
        self.conn_rooms.get(conn_id)
    }

    pub fn member(&self, conn_id: &ConnId) -> Option<&Member> {
        let room_id = self.conn_rooms.get(conn_id)?;
        self.rooms.get(room_id)?.member(conn_id)
    }

    pub fn is_full(&self, room_id: &RoomId) -> bool {
        self.rooms.get(room_id).is_some_and(Room::is_full)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
