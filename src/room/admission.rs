use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::registry::RoomRegistry;
use super::session::SessionDeduplicator;
use super::state::{ConnId, RoomId, SessionId};

/// Why the requester is asking: to open a room or to enter an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinIntent {
    Create,
    Join,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub room_id: RoomId,
    pub conn_id: ConnId,
    pub session_id: SessionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Admitted { as_host: bool },
    Queued { host: ConnId },
    RoomFull,
    RoomInactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved(JoinRequest),
    Rejected(JoinRequest),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    as_host: bool,
}

/// What a disconnecting connection left behind in the admission state.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Abandoned {
    pub request: Option<JoinRequest>,
    pub released_claim: Option<RoomId>,
}

/// A hostless room passed to one of its waiting requesters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handover {
    pub claimant: JoinRequest,
    pub waiting: Vec<JoinRequest>,
}

/// Gates first entry into a room through the host. Pending requests and
/// approvals are keyed by requester connection.
#[derive(Debug, Default)]
pub struct AdmissionController {
    pending: Vec<JoinRequest>,
    tickets: HashMap<ConnId, (RoomId, Ticket)>,
    host_claims: HashMap<RoomId, ConnId>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The connection whose decisions are honored for `room_id`: the registry's
    /// host, or the auto-approved first requester who has not joined yet.
    pub fn effective_host<'a>(
        &'a self,
        registry: &'a RoomRegistry,
        room_id: &RoomId,
    ) -> Option<&'a ConnId> {
        registry
            .get_host(room_id)
            .or_else(|| self.host_claims.get(room_id))
    }

    pub fn request_join(
        &mut self,
        registry: &RoomRegistry,
        sessions: &SessionDeduplicator,
        request: JoinRequest,
        intent: Option<JoinIntent>,
    ) -> RequestOutcome {
        self.forget(&request.conn_id);

        let room_id = request.room_id.clone();

        // A reload of a live member skips the host round-trip.
        if let Some(bound) = sessions.bound(&room_id, &request.session_id) {
            if registry.room(&room_id).is_some_and(|room| room.contains(bound)) {
                let as_host = registry.get_host(&room_id) == Some(bound);
                self.issue(request.conn_id, room_id, as_host);
                return RequestOutcome::Admitted { as_host };
            }
        }

        if registry.is_full(&room_id) {
            return RequestOutcome::RoomFull;
        }

        match self.effective_host(registry, &room_id).cloned() {
            Some(host) => {
                self.pending.push(request);
                RequestOutcome::Queued { host }
            }
            None if intent == Some(JoinIntent::Join) && registry.count(&room_id) == 0 => {
                RequestOutcome::RoomInactive
            }
            None => {
                self.host_claims
                    .insert(room_id.clone(), request.conn_id.clone());
                self.issue(request.conn_id, room_id, true);
                RequestOutcome::Admitted { as_host: true }
            }
        }
    }

    /// Applies a host's decision. Decisions for unknown requesters, or from
    /// anyone other than the room's current host, are ignored.
    pub fn decide(
        &mut self,
        registry: &RoomRegistry,
        decider: &ConnId,
        requester: &ConnId,
        approve: bool,
    ) -> Decision {
        let Some(index) = self.pending.iter().position(|r| &r.conn_id == requester) else {
            return Decision::Ignored;
        };
        let room_id = self.pending[index].room_id.clone();
        if self.effective_host(registry, &room_id) != Some(decider) {
            return Decision::Ignored;
        }

        let request = self.pending.remove(index);
        if approve {
            self.issue(request.conn_id.clone(), room_id, false);
            Decision::Approved(request)
        } else {
            Decision::Rejected(request)
        }
    }

    /// Consumes the approval for `conn_id` in `room_id`. Returns whether the
    /// approval was as host, or `None` if the connection was never admitted.
    pub fn take_ticket(&mut self, conn_id: &ConnId, room_id: &RoomId) -> Option<bool> {
        match self.tickets.get(conn_id) {
            Some((ticket_room, _)) if ticket_room == room_id => {}
            _ => return None,
        }
        let (_, ticket) = self.tickets.remove(conn_id)?;
        if self.host_claims.get(room_id) == Some(conn_id) {
            self.host_claims.remove(room_id);
        }
        Some(ticket.as_host)
    }

    pub fn pending_for(&self, room_id: &RoomId) -> impl Iterator<Item = &JoinRequest> {
        let room_id = room_id.clone();
        self.pending.iter().filter(move |r| r.room_id == room_id)
    }

    #[cfg(test)]
    fn is_pending(&self, conn_id: &ConnId) -> bool {
        self.pending.iter().any(|r| &r.conn_id == conn_id)
    }

    /// Gives a room that lost its host (or host claimant) to its oldest
    /// pending requester, who is admitted as host. Returns that request and
    /// the requests still waiting on the new host.
    pub fn hand_over(&mut self, registry: &RoomRegistry, room_id: &RoomId) -> Option<Handover> {
        if self.effective_host(registry, room_id).is_some() {
            return None;
        }
        let index = self.pending.iter().position(|r| &r.room_id == room_id)?;
        let claimant = self.pending.remove(index);
        self.host_claims
            .insert(room_id.clone(), claimant.conn_id.clone());
        self.issue(claimant.conn_id.clone(), room_id.clone(), true);
        let waiting = self.pending_for(room_id).cloned().collect();
        Some(Handover { claimant, waiting })
    }

    /// Drops everything the connection had in flight.
    pub fn abandon(&mut self, conn_id: &ConnId) -> Abandoned {
        let request = self
            .pending
            .iter()
            .position(|r| &r.conn_id == conn_id)
            .map(|index| self.pending.remove(index));
        self.tickets.remove(conn_id);

        let released_claim = self
            .host_claims
            .iter()
            .find(|(_, claimant)| *claimant == conn_id)
            .map(|(room_id, _)| room_id.clone());
        if let Some(room_id) = &released_claim {
            self.host_claims.remove(room_id);
        }

        Abandoned {
            request,
            released_claim,
        }
    }

    fn issue(&mut self, conn_id: ConnId, room_id: RoomId, as_host: bool) {
        self.tickets.insert(conn_id, (room_id, Ticket { as_host }));
    }

    fn forget(&mut self, conn_id: &ConnId) {
        self.pending.retain(|r| &r.conn_id != conn_id);
        self.tickets.remove(conn_id);
    }
}
