//! Server side of the room service: the [`Hub`] owns every piece of shared
//! room state behind one lock and turns inbound client messages into
//! outbound events.

mod ws;

pub use ws::{serve, serve_connection};

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::notify::{LogNotifier, Notifier};
use crate::relay::{OutboundSender, Relay};
use crate::room::admission::{
    AdmissionController, Decision, Handover, JoinIntent, JoinRequest, RequestOutcome,
};
use crate::room::registry::{Registration, RoomRegistry};
use crate::room::session::SessionDeduplicator;
use crate::room::state::{ConnId, Member, RoomId, SessionId};
use crate::signaling::{ClientMessage, ServerMessage};

struct HubState {
    registry: RoomRegistry,
    sessions: SessionDeduplicator,
    admission: AdmissionController,
    relay: Relay,
}

/// Shared room service injected into every connection handler.
pub struct Hub {
    state: Mutex<HubState>,
    notifier: Arc<dyn Notifier>,
}

impl Hub {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_notifier(config, Arc::new(LogNotifier))
    }

    pub fn with_notifier(config: &ServerConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            state: Mutex::new(HubState {
                registry: RoomRegistry::new(config.max_participants),
                sessions: SessionDeduplicator::new(),
                admission: AdmissionController::new(),
                relay: Relay::new(),
            }),
            notifier,
        }
    }

    /// Registers a new transport connection and greets it with its id.
    pub async fn connect(&self, tx: OutboundSender) -> ConnId {
        let conn_id = ConnId::generate();
        let mut state = self.state.lock().await;
        state.relay.attach(conn_id.clone(), tx);
        state.relay.send(
            &conn_id,
            ServerMessage::Welcome {
                conn_id: conn_id.clone(),
            },
        );
        info!(conn = %conn_id, "connection opened");
        conn_id
    }

    pub async fn handle(&self, conn_id: &ConnId, msg: ClientMessage) {
        let mut state = self.state.lock().await;
        match msg {
            ClientMessage::RequestJoin {
                room,
                name,
                session_id,
                intent,
            } => state.request_join(conn_id, room, name, session_id, intent),
            ClientMessage::AdminDecision { requester, approve } => {
                state.admin_decision(conn_id, &requester, approve)
            }
            ClientMessage::Kick { target } => state.kick(conn_id, &target),
            ClientMessage::Join {
                room,
                session_id,
                name,
            } => state.join(conn_id, room, session_id, name, self.notifier.as_ref()),
            ClientMessage::Signal { to, payload } => {
                state
                    .relay
                    .relay_to_one(&state.registry, conn_id, &to, payload);
            }
            ClientMessage::WatchCommand { command } => {
                state.broadcast_from(conn_id, ServerMessage::WatchCommand { command })
            }
            ClientMessage::WatchUrl { url } => {
                state.broadcast_from(conn_id, ServerMessage::WatchUrl { url })
            }
            ClientMessage::FilterUpdate { tag } => state.broadcast_from(
                conn_id,
                ServerMessage::FilterUpdate {
                    member: conn_id.clone(),
                    tag,
                },
            ),
            ClientMessage::StartScreenShare => state.broadcast_from(
                conn_id,
                ServerMessage::ScreenShareStarted {
                    member: conn_id.clone(),
                },
            ),
            ClientMessage::ToggleAudio { muted } => state.broadcast_from(
                conn_id,
                ServerMessage::AudioToggled {
                    member: conn_id.clone(),
                    muted,
                },
            ),
            ClientMessage::Chat { text } => state.chat(conn_id, text),
            ClientMessage::TypingStart => state.typing(conn_id, true),
            ClientMessage::TypingStop => state.typing(conn_id, false),
            ClientMessage::BrowserUpdate { url } => {
                state.broadcast_from(conn_id, ServerMessage::BrowserUpdate { url })
            }
        }
    }

    /// Transport-level disconnect. Safe to call for connections that were
    /// already evicted or kicked.
    pub async fn disconnect(&self, conn_id: &ConnId) {
        let mut state = self.state.lock().await;
        let was_attached = state.relay.detach(conn_id);
        let abandoned = state.admission.abandon(conn_id);
        if let Some(request) = abandoned.request {
            debug!(conn = %conn_id, room = %request.room_id, "join request abandoned");
        }
        if let Some(room_id) = abandoned.released_claim {
            debug!(conn = %conn_id, room = %room_id, "host claim released");
            state.hand_over(&room_id);
        }
        state.remove_member(conn_id);
        if was_attached {
            info!(conn = %conn_id, "connection closed");
        }
    }

    pub async fn count(&self, room_id: &RoomId) -> usize {
        self.state.lock().await.registry.count(room_id)
    }

    pub async fn host(&self, room_id: &RoomId) -> Option<ConnId> {
        self.state.lock().await.registry.get_host(room_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.registry.room_count()
    }
}

impl HubState {
    fn request_join(
        &mut self,
        conn_id: &ConnId,
        room_id: RoomId,
        name: String,
        session_id: SessionId,
        intent: Option<JoinIntent>,
    ) {
        if self.refuse_second_room(conn_id, &room_id) {
            return;
        }
        let request = JoinRequest {
            room_id: room_id.clone(),
            conn_id: conn_id.clone(),
            session_id,
            name: name.clone(),
        };
        let outcome = self
            .admission
            .request_join(&self.registry, &self.sessions, request, intent);

        match outcome {
            RequestOutcome::Admitted { as_host } => {
                info!(conn = %conn_id, room = %room_id, as_host, "join admitted");
                self.relay.send(conn_id, ServerMessage::Admitted { as_host });
            }
            RequestOutcome::Queued { host } => {
                info!(conn = %conn_id, room = %room_id, host = %host, "join request queued for host");
                self.relay.send(
                    &host,
                    ServerMessage::JoinRequested {
                        conn_id: conn_id.clone(),
                        name,
                    },
                );
            }
            RequestOutcome::RoomFull => {
                info!(conn = %conn_id, room = %room_id, "join refused, room full");
                self.relay.send(conn_id, ServerMessage::RoomFull);
            }
            RequestOutcome::RoomInactive => {
                info!(conn = %conn_id, room = %room_id, "join refused, room inactive");
                self.relay.send(conn_id, ServerMessage::RoomInactive);
            }
        }
    }

    fn admin_decision(&mut self, decider: &ConnId, requester: &ConnId, approve: bool) {
        match self
            .admission
            .decide(&self.registry, decider, requester, approve)
        {
            Decision::Approved(request) => {
                info!(conn = %request.conn_id, room = %request.room_id, "host approved join");
                self.relay
                    .send(&request.conn_id, ServerMessage::Admitted { as_host: false });
            }
            Decision::Rejected(request) => {
                info!(conn = %request.conn_id, room = %request.room_id, "host rejected join");
                self.relay.send(&request.conn_id, ServerMessage::Rejected);
            }
            Decision::Ignored => {
                debug!(decider = %decider, requester = %requester, "ignoring admission decision");
            }
        }
    }

    fn join(
        &mut self,
        conn_id: &ConnId,
        room_id: RoomId,
        session_id: SessionId,
        name: String,
        notifier: &dyn Notifier,
    ) {
        if self.registry.room_of(conn_id) == Some(&room_id) {
            return;
        }
        if self.refuse_second_room(conn_id, &room_id) {
            return;
        }
        let Some(admitted_as_host) = self.admission.take_ticket(conn_id, &room_id) else {
            warn!(conn = %conn_id, room = %room_id, "join without admission");
            self.relay.send(
                conn_id,
                ServerMessage::Error {
                    message: "join requires admission".to_string(),
                },
            );
            return;
        };

        let member = Member {
            conn_id: conn_id.clone(),
            session_id: session_id.clone(),
            name: name.clone(),
        };

        let evicted = self.sessions.resolve(&room_id, &session_id, conn_id);
        let replaced = match evicted {
            Some(stale) => self.evict(&room_id, &stale, member.clone()),
            None => false,
        };

        if !replaced {
            match self
                .registry
                .register(&room_id, conn_id.clone(), session_id.clone(), name.clone())
            {
                Ok(Registration::Accepted {
                    became_host,
                    room_created,
                }) => {
                    debug!(conn = %conn_id, room = %room_id, became_host, "member registered");
                    if room_created {
                        notifier.room_created(&room_id, &name);
                    }
                }
                Ok(Registration::AlreadyMember) => {}
                Err(_) => {
                    info!(conn = %conn_id, room = %room_id, "join refused at registration, room full");
                    self.sessions.release(&room_id, &session_id, conn_id);
                    self.relay.send(conn_id, ServerMessage::RoomFull);
                    return;
                }
            }
        }

        info!(conn = %conn_id, room = %room_id, count = self.registry.count(&room_id), "member joined");
        self.relay.broadcast_to_room(
            &self.registry,
            &room_id,
            Some(conn_id),
            &ServerMessage::MemberJoined {
                conn_id: conn_id.clone(),
                name: name.clone(),
            },
        );
        notifier.member_joined(&room_id, &name);

        let is_host = self.registry.get_host(&room_id) == Some(conn_id);
        if is_host != admitted_as_host {
            self.relay
                .send(conn_id, ServerMessage::HostChanged { is_host });
        }
    }

    /// Terminates a connection superseded by a newer one with the same session.
    /// Returns true if the newcomer took over the stale member's slot.
    fn evict(&mut self, room_id: &RoomId, stale: &ConnId, successor: Member) -> bool {
        info!(room = %room_id, stale = %stale, successor = %successor.conn_id, "evicting superseded session");
        self.relay.close(stale);
        self.admission.abandon(stale);

        if self.registry.room_of(stale) != Some(room_id) {
            return false;
        }
        self.relay.broadcast_to_room(
            &self.registry,
            room_id,
            Some(stale),
            &ServerMessage::MemberLeft {
                conn_id: stale.clone(),
            },
        );
        self.registry.replace(room_id, stale, successor)
    }

    fn kick(&mut self, decider: &ConnId, target: &ConnId) {
        let Some(room_id) = self.registry.room_of(decider).cloned() else {
            return;
        };
        if self.registry.get_host(&room_id) != Some(decider)
            || decider == target
            || self.registry.room_of(target) != Some(&room_id)
        {
            debug!(decider = %decider, target = %target, "ignoring kick");
            return;
        }
        info!(room = %room_id, target = %target, "host removed member");
        self.relay.send(target, ServerMessage::Kicked);
        self.relay.close(target);
        self.admission.abandon(target);
        self.remove_member(target);
    }

    fn remove_member(&mut self, conn_id: &ConnId) {
        let Some(room_id) = self.registry.room_of(conn_id).cloned() else {
            return;
        };
        let Some(departure) = self.registry.unregister(&room_id, conn_id) else {
            return;
        };
        self.sessions
            .release(&room_id, &departure.member.session_id, conn_id);
        self.relay.broadcast_to_room(
            &self.registry,
            &room_id,
            None,
            &ServerMessage::MemberLeft {
                conn_id: conn_id.clone(),
            },
        );

        if let Some(promoted) = departure.promoted {
            info!(room = %room_id, host = %promoted, "host promoted");
            self.relay
                .send(&promoted, ServerMessage::HostChanged { is_host: true });
            let pending: Vec<_> = self
                .admission
                .pending_for(&room_id)
                .map(|r| (r.conn_id.clone(), r.name.clone()))
                .collect();
            for (requester, name) in pending {
                self.relay.send(
                    &promoted,
                    ServerMessage::JoinRequested {
                        conn_id: requester,
                        name,
                    },
                );
            }
        }
        if departure.room_closed {
            info!(room = %room_id, "room closed");
            self.hand_over(&room_id);
        }
    }

    /// A connection belongs to at most one room; asking for another one while
    /// still a member is answered with an error and otherwise ignored.
    fn refuse_second_room(&self, conn_id: &ConnId, room_id: &RoomId) -> bool {
        match self.registry.room_of(conn_id) {
            Some(current) if current != room_id => {
                warn!(conn = %conn_id, room = %room_id, current = %current, "already a member of another room");
                self.relay.send(
                    conn_id,
                    ServerMessage::Error {
                        message: format!("already a member of room {current}"),
                    },
                );
                true
            }
            _ => false,
        }
    }

    /// Admits the oldest waiting requester of a hostless room as its host and
    /// points the other waiting requests at them.
    fn hand_over(&mut self, room_id: &RoomId) {
        let Some(Handover { claimant, waiting }) =
            self.admission.hand_over(&self.registry, room_id)
        else {
            return;
        };
        info!(room = %room_id, conn = %claimant.conn_id, waiting = waiting.len(), "pending requester admitted as host");
        self.relay
            .send(&claimant.conn_id, ServerMessage::Admitted { as_host: true });
        for request in waiting {
            self.relay.send(
                &claimant.conn_id,
                ServerMessage::JoinRequested {
                    conn_id: request.conn_id,
                    name: request.name,
                },
            );
        }
    }

    fn broadcast_from(&self, conn_id: &ConnId, msg: ServerMessage) {
        let Some(room_id) = self.registry.room_of(conn_id) else {
            debug!(conn = %conn_id, "dropping room event from non-member");
            return;
        };
        self.relay
            .broadcast_to_room(&self.registry, room_id, Some(conn_id), &msg);
    }

    fn chat(&self, conn_id: &ConnId, text: String) {
        let (Some(room_id), Some(member)) =
            (self.registry.room_of(conn_id), self.registry.member(conn_id))
        else {
            return;
        };
        let msg = ServerMessage::Chat {
            from: conn_id.clone(),
            name: member.name.clone(),
            text,
        };
        self.relay
            .broadcast_to_room(&self.registry, room_id, None, &msg);
    }

    fn typing(&self, conn_id: &ConnId, typing: bool) {
        let Some(member) = self.registry.member(conn_id) else {
            return;
        };
        let msg = ServerMessage::UserTyping {
            member: conn_id.clone(),
            name: member.name.clone(),
            typing,
        };
        self.broadcast_from(conn_id, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Outbound;
    use crate::sync::watch::WatchCommand;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Conn {
        id: ConnId,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl Conn {
        fn drain(&mut self) -> Vec<Outbound> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn messages(&mut self) -> Vec<ServerMessage> {
            self.drain()
                .into_iter()
                .filter_map(|o| match o {
                    Outbound::Message(m) => Some(m),
                    Outbound::Close => None,
                })
                .collect()
        }
    }

    async fn connect(hub: &Hub) -> Conn {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.connect(tx).await;
        let mut conn = Conn { id, rx };
        conn.drain();
        conn
    }

    fn hub() -> Hub {
        Hub::new(&ServerConfig::default())
    }

    async fn request(hub: &Hub, conn: &Conn, room: &str, session: &str) {
        hub.handle(
            &conn.id,
            ClientMessage::RequestJoin {
                room: room.into(),
                name: format!("user-{session}"),
                session_id: session.into(),
                intent: None,
            },
        )
        .await;
    }

    async fn join(hub: &Hub, conn: &Conn, room: &str, session: &str) {
        hub.handle(
            &conn.id,
            ClientMessage::Join {
                room: room.into(),
                session_id: session.into(),
                name: format!("user-{session}"),
            },
        )
        .await;
    }

    /// Admits `session` as host of an empty room.
    async fn open_room(hub: &Hub, room: &str, session: &str) -> Conn {
        let mut conn = connect(hub).await;
        request(hub, &conn, room, session).await;
        join(hub, &conn, room, session).await;
        conn.drain();
        conn
    }

    async fn admit(hub: &Hub, host: &mut Conn, room: &str, session: &str) -> Conn {
        let mut conn = connect(hub).await;
        request(hub, &conn, room, session).await;
        hub.handle(
            &host.id,
            ClientMessage::AdminDecision {
                requester: conn.id.clone(),
                approve: true,
            },
        )
        .await;
        join(hub, &conn, room, session).await;
        conn.drain();
        host.drain();
        conn
    }

    #[tokio::test]
    async fn host_approval_flow() {
        let hub = hub();
        let mut a = connect(&hub).await;
        request(&hub, &a, "abc123", "s1").await;
        assert_eq!(a.messages(), vec![ServerMessage::Admitted { as_host: true }]);
        join(&hub, &a, "abc123", "s1").await;
        assert!(a.messages().is_empty());

        let mut b = connect(&hub).await;
        request(&hub, &b, "abc123", "s2").await;
        assert!(b.messages().is_empty());
        assert_eq!(
            a.messages(),
            vec![ServerMessage::JoinRequested {
                conn_id: b.id.clone(),
                name: "user-s2".into()
            }]
        );

        hub.handle(
            &a.id,
            ClientMessage::AdminDecision {
                requester: b.id.clone(),
                approve: true,
            },
        )
        .await;
        assert_eq!(b.messages(), vec![ServerMessage::Admitted { as_host: false }]);

        join(&hub, &b, "abc123", "s2").await;
        assert_eq!(
            a.messages(),
            vec![ServerMessage::MemberJoined {
                conn_id: b.id.clone(),
                name: "user-s2".into()
            }]
        );
        assert_eq!(hub.count(&"abc123".into()).await, 2);
        assert_eq!(hub.host(&"abc123".into()).await, Some(a.id.clone()));
    }

    #[tokio::test]
    async fn rejected_requester_never_joins() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let mut b = connect(&hub).await;
        request(&hub, &b, "r", "s2").await;
        a.drain();
        hub.handle(
            &a.id,
            ClientMessage::AdminDecision {
                requester: b.id.clone(),
                approve: false,
            },
        )
        .await;
        assert_eq!(b.messages(), vec![ServerMessage::Rejected]);

        join(&hub, &b, "r", "s2").await;
        assert!(matches!(b.messages().as_slice(), [ServerMessage::Error { .. }]));
        assert_eq!(hub.count(&"r".into()).await, 1);
    }

    #[tokio::test]
    async fn reload_evicts_stale_connection_without_growing_room() {
        let hub = hub();
        let mut host = open_room(&hub, "r1", "host").await;
        let mut a = admit(&hub, &mut host, "r1", "s1").await;
        assert_eq!(hub.count(&"r1".into()).await, 2);

        let mut a2 = connect(&hub).await;
        request(&hub, &a2, "r1", "s1").await;
        assert_eq!(a2.messages(), vec![ServerMessage::Admitted { as_host: false }]);
        assert!(host.messages().is_empty());

        join(&hub, &a2, "r1", "s1").await;
        assert_eq!(hub.count(&"r1".into()).await, 2);
        assert_eq!(
            host.messages(),
            vec![
                ServerMessage::MemberLeft { conn_id: a.id.clone() },
                ServerMessage::MemberJoined {
                    conn_id: a2.id.clone(),
                    name: "user-s1".into()
                },
            ]
        );
        assert_eq!(a.drain(), vec![Outbound::Close]);

        // The stale socket noticing its own death later changes nothing.
        hub.disconnect(&a.id).await;
        assert!(host.messages().is_empty());
        assert_eq!(hub.count(&"r1".into()).await, 2);
    }

    #[tokio::test]
    async fn reload_of_sole_host_keeps_host() {
        let hub = hub();
        let a = open_room(&hub, "r1", "s1").await;
        let mut a2 = connect(&hub).await;
        request(&hub, &a2, "r1", "s1").await;
        join(&hub, &a2, "r1", "s1").await;
        assert_eq!(a2.messages(), vec![ServerMessage::Admitted { as_host: true }]);
        assert_eq!(hub.count(&"r1".into()).await, 1);
        assert_eq!(hub.host(&"r1".into()).await, Some(a2.id.clone()));
        hub.disconnect(&a.id).await;
        assert_eq!(hub.host(&"r1".into()).await, Some(a2.id));
    }

    #[tokio::test]
    async fn eleventh_session_gets_room_full() {
        let hub = hub();
        let mut host = open_room(&hub, "full1", "s0").await;
        let mut members = Vec::new();
        for i in 1..10 {
            members.push(admit(&hub, &mut host, "full1", &format!("s{i}")).await);
        }
        assert_eq!(hub.count(&"full1".into()).await, 10);

        let mut late = connect(&hub).await;
        request(&hub, &late, "full1", "s10").await;
        assert_eq!(late.messages(), vec![ServerMessage::RoomFull]);
        assert_eq!(hub.count(&"full1".into()).await, 10);
    }

    #[tokio::test]
    async fn approved_join_into_filled_room_is_refused() {
        let hub = Hub::new(&ServerConfig {
            max_participants: 2,
            ..ServerConfig::default()
        });
        let mut host = open_room(&hub, "r", "s0").await;
        let mut b = connect(&hub).await;
        let mut c = connect(&hub).await;
        request(&hub, &b, "r", "s1").await;
        request(&hub, &c, "r", "s2").await;
        for conn in [&b, &c] {
            hub.handle(
                &host.id,
                ClientMessage::AdminDecision {
                    requester: conn.id.clone(),
                    approve: true,
                },
            )
            .await;
        }
        join(&hub, &b, "r", "s1").await;
        join(&hub, &c, "r", "s2").await;
        b.drain();
        host.drain();
        assert_eq!(
            c.messages(),
            vec![ServerMessage::Admitted { as_host: false }, ServerMessage::RoomFull]
        );
        assert_eq!(hub.count(&"r".into()).await, 2);
    }

    #[tokio::test]
    async fn host_departure_promotes_exactly_one_member() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let mut b = admit(&hub, &mut a, "r", "s2").await;
        let mut c = admit(&hub, &mut a, "r", "s3").await;
        b.drain();

        hub.disconnect(&a.id).await;
        let b_msgs = b.messages();
        let c_msgs = c.messages();
        assert!(b_msgs.contains(&ServerMessage::MemberLeft { conn_id: a.id.clone() }));
        assert!(c_msgs.contains(&ServerMessage::MemberLeft { conn_id: a.id.clone() }));

        let promoted: Vec<_> = [(&b, &b_msgs), (&c, &c_msgs)]
            .into_iter()
            .filter(|(_, msgs)| msgs.contains(&ServerMessage::HostChanged { is_host: true }))
            .map(|(conn, _)| conn.id.clone())
            .collect();
        assert_eq!(promoted.len(), 1);
        assert_eq!(hub.host(&"r".into()).await, Some(promoted[0].clone()));
    }

    #[tokio::test]
    async fn promoted_host_inherits_pending_requests() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let mut b = admit(&hub, &mut a, "r", "s2").await;
        let waiting = connect(&hub).await;
        request(&hub, &waiting, "r", "s3").await;

        hub.disconnect(&a.id).await;
        assert_eq!(
            b.messages(),
            vec![
                ServerMessage::MemberLeft { conn_id: a.id.clone() },
                ServerMessage::HostChanged { is_host: true },
                ServerMessage::JoinRequested {
                    conn_id: waiting.id.clone(),
                    name: "user-s3".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn last_member_leaving_deletes_room() {
        let hub = hub();
        let a = open_room(&hub, "r", "s1").await;
        hub.disconnect(&a.id).await;
        assert_eq!(hub.room_count().await, 0);
        assert_eq!(hub.host(&"r".into()).await, None);

        let mut next = connect(&hub).await;
        request(&hub, &next, "r", "s9").await;
        assert_eq!(next.messages(), vec![ServerMessage::Admitted { as_host: true }]);
    }

    #[tokio::test]
    async fn kick_is_host_only() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let mut b = admit(&hub, &mut a, "r", "s2").await;
        let mut c = admit(&hub, &mut a, "r", "s3").await;
        b.drain();

        hub.handle(&b.id, ClientMessage::Kick { target: c.id.clone() })
            .await;
        assert!(c.drain().is_empty());

        hub.handle(&a.id, ClientMessage::Kick { target: c.id.clone() })
            .await;
        assert_eq!(
            c.drain(),
            vec![Outbound::Message(ServerMessage::Kicked), Outbound::Close]
        );
        assert_eq!(
            b.messages(),
            vec![ServerMessage::MemberLeft { conn_id: c.id.clone() }]
        );
        assert_eq!(hub.count(&"r".into()).await, 2);
    }

    #[tokio::test]
    async fn state_sync_excludes_origin() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let mut b = admit(&hub, &mut a, "r", "s2").await;

        hub.handle(
            &a.id,
            ClientMessage::WatchCommand {
                command: WatchCommand::Seek { time: 12.0 },
            },
        )
        .await;
        hub.handle(&a.id, ClientMessage::FilterUpdate { tag: "sepia".into() })
            .await;
        assert!(a.messages().is_empty());
        assert_eq!(
            b.messages(),
            vec![
                ServerMessage::WatchCommand {
                    command: WatchCommand::Seek { time: 12.0 }
                },
                ServerMessage::FilterUpdate {
                    member: a.id.clone(),
                    tag: "sepia".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn chat_reaches_sender_too() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let mut b = admit(&hub, &mut a, "r", "s2").await;
        hub.handle(&b.id, ClientMessage::Chat { text: "hi".into() }).await;
        let expected = ServerMessage::Chat {
            from: b.id.clone(),
            name: "user-s2".into(),
            text: "hi".into(),
        };
        assert_eq!(a.messages(), vec![expected.clone()]);
        assert_eq!(b.messages(), vec![expected]);
    }

    #[tokio::test]
    async fn signal_is_routed_point_to_point() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let mut b = admit(&hub, &mut a, "r", "s2").await;
        let payload = crate::signaling::NegotiationPayload(json!({"kind": "description"}));
        hub.handle(
            &b.id,
            ClientMessage::Signal {
                to: a.id.clone(),
                payload: payload.clone(),
            },
        )
        .await;
        assert_eq!(
            a.messages(),
            vec![ServerMessage::Signal {
                from: b.id.clone(),
                name: "user-s2".into(),
                payload
            }]
        );
        assert!(b.messages().is_empty());
    }

    #[tokio::test]
    async fn events_from_non_members_are_dropped() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let outsider = connect(&hub).await;
        hub.handle(&outsider.id, ClientMessage::WatchUrl { url: "x".into() })
            .await;
        assert!(a.messages().is_empty());
    }

    #[tokio::test]
    async fn member_cannot_enter_a_second_room() {
        let hub = hub();
        let mut a = open_room(&hub, "r1", "s1").await;

        request(&hub, &a, "r2", "s1").await;
        assert!(matches!(a.messages().as_slice(), [ServerMessage::Error { .. }]));
        join(&hub, &a, "r2", "s1").await;
        assert!(matches!(a.messages().as_slice(), [ServerMessage::Error { .. }]));
        assert_eq!(hub.count(&"r2".into()).await, 0);
        assert_eq!(hub.count(&"r1".into()).await, 1);

        // r2 never got a claimant, so the next requester opens it.
        let mut b = connect(&hub).await;
        request(&hub, &b, "r2", "s2").await;
        assert_eq!(b.messages(), vec![ServerMessage::Admitted { as_host: true }]);

        hub.disconnect(&a.id).await;
        assert_eq!(hub.count(&"r1".into()).await, 0);
        assert_eq!(hub.host(&"r1".into()).await, None);
        assert_eq!(hub.room_count().await, 0);
    }

    #[tokio::test]
    async fn abandoned_host_claim_hands_room_to_waiting_requester() {
        let hub = hub();
        let mut a = connect(&hub).await;
        request(&hub, &a, "r", "s1").await;
        assert_eq!(a.messages(), vec![ServerMessage::Admitted { as_host: true }]);
        let mut b = connect(&hub).await;
        let mut c = connect(&hub).await;
        request(&hub, &b, "r", "s2").await;
        request(&hub, &c, "r", "s3").await;

        hub.disconnect(&a.id).await;
        assert_eq!(
            b.messages(),
            vec![
                ServerMessage::Admitted { as_host: true },
                ServerMessage::JoinRequested {
                    conn_id: c.id.clone(),
                    name: "user-s3".into()
                },
            ]
        );
        assert!(c.messages().is_empty());

        join(&hub, &b, "r", "s2").await;
        assert_eq!(hub.host(&"r".into()).await, Some(b.id.clone()));
        hub.handle(
            &b.id,
            ClientMessage::AdminDecision {
                requester: c.id.clone(),
                approve: true,
            },
        )
        .await;
        assert_eq!(c.messages(), vec![ServerMessage::Admitted { as_host: false }]);
    }

    #[tokio::test]
    async fn last_member_leaving_hands_room_to_waiting_requester() {
        let hub = hub();
        let a = open_room(&hub, "r", "s1").await;
        let mut waiting = connect(&hub).await;
        request(&hub, &waiting, "r", "s2").await;
        assert!(waiting.messages().is_empty());

        hub.disconnect(&a.id).await;
        assert_eq!(waiting.messages(), vec![ServerMessage::Admitted { as_host: true }]);
        assert_eq!(hub.room_count().await, 0);

        join(&hub, &waiting, "r", "s2").await;
        assert!(waiting.messages().is_empty());
        assert_eq!(hub.host(&"r".into()).await, Some(waiting.id.clone()));
    }

    #[tokio::test]
    async fn typing_indicator_skips_the_typist() {
        let hub = hub();
        let mut a = open_room(&hub, "r", "s1").await;
        let mut b = admit(&hub, &mut a, "r", "s2").await;

        hub.handle(&b.id, ClientMessage::TypingStart).await;
        hub.handle(&b.id, ClientMessage::TypingStop).await;
        assert!(b.messages().is_empty());
        assert_eq!(
            a.messages(),
            vec![
                ServerMessage::UserTyping {
                    member: b.id.clone(),
                    name: "user-s2".into(),
                    typing: true
                },
                ServerMessage::UserTyping {
                    member: b.id.clone(),
                    name: "user-s2".into(),
                    typing: false
                },
            ]
        );
    }
}
