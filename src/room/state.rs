use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of live connections a room accepts.
pub const ROOM_CAPACITY: usize = 10;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Client-supplied room name. Rooms exist only while they have members.
    RoomId
);
string_id!(
    /// Server-assigned identifier of one live transport connection.
    ConnId
);
string_id!(
    /// Durable client token that survives page reloads.
    SessionId
);

impl ConnId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub conn_id: ConnId,
    pub session_id: SessionId,
    pub name: String,
}

/// Active membership of one room. Members are kept in join order so that
/// "first remaining member" is well defined when the host leaves.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    members: Vec<Member>,
    host: Option<ConnId>,
    capacity: usize,
}

impl Room {
    pub fn new(id: RoomId, capacity: usize) -> Self {
        Self {
            id,
            members: Vec::new(),
            host: None,
            capacity,
        }
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, conn_id: &ConnId) -> Option<&Member> {
        self.members.iter().find(|m| &m.conn_id == conn_id)
    }

    pub fn contains(&self, conn_id: &ConnId) -> bool {
        self.member(conn_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    pub fn host(&self) -> Option<&ConnId> {
        self.host.as_ref()
    }

    pub(crate) fn set_host(&mut self, conn_id: Option<ConnId>) {
        self.host = conn_id;
    }

    pub(crate) fn push(&mut self, member: Member) {
        self.members.push(member);
    }

    pub(crate) fn remove(&mut self, conn_id: &ConnId) -> Option<Member> {
        let index = self.members.iter().position(|m| &m.conn_id == conn_id)?;
        Some(self.members.remove(index))
    }

    /// Swaps one member's connection for another in place, keeping its slot
    /// and its host status.
    pub(crate) fn replace(&mut self, old: &ConnId, member: Member) -> bool {
        let Some(slot) = self.members.iter_mut().find(|m| &m.conn_id == old) else {
            return false;
        };
        *slot = member.clone();
        if self.host.as_ref() == Some(old) {
            self.host = Some(member.conn_id);
        }
        true
    }
}
