use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::room::registry::RoomRegistry;
use crate::room::state::{ConnId, RoomId};
use crate::signaling::{NegotiationPayload, ServerMessage};

/// What a connection's writer task is asked to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Best-effort delivery to live connections. Nothing here reports failure to
/// the sender: messages for unknown or dead connections are dropped.
#[derive(Debug, Default)]
pub struct Relay {
    connections: HashMap<ConnId, OutboundSender>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, conn_id: ConnId, tx: OutboundSender) {
        self.connections.insert(conn_id, tx);
    }

    pub fn detach(&mut self, conn_id: &ConnId) -> bool {
        self.connections.remove(conn_id).is_some()
    }

    #[cfg(test)]
    fn is_attached(&self, conn_id: &ConnId) -> bool {
        self.connections.contains_key(conn_id)
    }

    pub fn send(&self, conn_id: &ConnId, msg: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(tx) => tx.send(Outbound::Message(msg)).is_ok(),
            None => {
                debug!(conn = %conn_id, "dropping message for unknown connection");
                false
            }
        }
    }

    /// Asks the connection's transport to shut down and forgets it.
    pub fn close(&mut self, conn_id: &ConnId) {
        if let Some(tx) = self.connections.remove(conn_id) {
            let _ = tx.send(Outbound::Close);
        }
    }

    /// Forwards a negotiation payload between two members of the same room.
    pub fn relay_to_one(
        &self,
        registry: &RoomRegistry,
        from: &ConnId,
        to: &ConnId,
        payload: NegotiationPayload,
    ) -> bool {
        let (Some(sender), Some(from_room)) = (registry.member(from), registry.room_of(from)) else {
            debug!(from = %from, "dropping signal from non-member");
            return false;
        };
        if registry.room_of(to) != Some(from_room) {
            debug!(from = %from, to = %to, "dropping signal for connection outside the room");
            return false;
        }
        self.send(
            to,
            ServerMessage::Signal {
                from: from.clone(),
                name: sender.name.clone(),
                payload,
            },
        )
    }

    /// Sends `msg` to every member of the room except `origin`. Returns the
    /// number of connections it was handed to.
    pub fn broadcast_to_room(
        &self,
        registry: &RoomRegistry,
        room_id: &RoomId,
        origin: Option<&ConnId>,
        msg: &ServerMessage,
    ) -> usize {
        let Some(room) = registry.room(room_id) else {
            return 0;
        };
        room.members()
            .iter()
            .filter(|m| Some(&m.conn_id) != origin)
            .filter(|m| self.send(&m.conn_id, msg.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attach(relay: &mut Relay, conn: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        relay.attach(conn.into(), tx);
        rx
    }

    fn registry_with(room: &str, conns: &[&str]) -> RoomRegistry {
        let mut registry = RoomRegistry::default();
        for conn in conns {
            registry
                .register(&room.into(), (*conn).into(), format!("s-{conn}").into(), conn.to_uppercase())
                .unwrap();
        }
        registry
    }

    #[test]
    fn relay_to_one_tags_sender() {
        let mut relay = Relay::new();
        let _a = attach(&mut relay, "a");
        let mut b = attach(&mut relay, "b");
        let registry = registry_with("r", &["a", "b"]);

        let payload = NegotiationPayload(json!({"sdp": "x"}));
        assert!(relay.relay_to_one(&registry, &"a".into(), &"b".into(), payload.clone()));
        assert_eq!(
            b.try_recv().unwrap(),
            Outbound::Message(ServerMessage::Signal {
                from: "a".into(),
                name: "A".into(),
                payload,
            })
        );
    }

    #[test]
    fn relay_to_missing_connection_is_dropped() {
        let mut relay = Relay::new();
        let _a = attach(&mut relay, "a");
        let registry = registry_with("r", &["a"]);
        assert!(!relay.relay_to_one(
            &registry,
            &"a".into(),
            &"ghost".into(),
            NegotiationPayload(json!(null))
        ));
    }

    #[test]
    fn relay_does_not_cross_rooms() {
        let mut relay = Relay::new();
        let _a = attach(&mut relay, "a");
        let mut b = attach(&mut relay, "b");
        let mut registry = registry_with("r1", &["a"]);
        registry
            .register(&"r2".into(), "b".into(), "s-b".into(), "B".into())
            .unwrap();
        assert!(!relay.relay_to_one(&registry, &"a".into(), &"b".into(), NegotiationPayload(json!(1))));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn broadcast_skips_origin() {
        let mut relay = Relay::new();
        let mut a = attach(&mut relay, "a");
        let mut b = attach(&mut relay, "b");
        let mut c = attach(&mut relay, "c");
        let registry = registry_with("r", &["a", "b", "c"]);

        let msg = ServerMessage::WatchUrl { url: "https://v".into() };
        assert_eq!(relay.broadcast_to_room(&registry, &"r".into(), Some(&"a".into()), &msg), 2);
        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().unwrap(), Outbound::Message(msg.clone()));
        assert_eq!(c.try_recv().unwrap(), Outbound::Message(msg));
    }

    #[test]
    fn close_sends_close_once() {
        let mut relay = Relay::new();
        let mut a = attach(&mut relay, "a");
        relay.close(&"a".into());
        relay.close(&"a".into());
        assert_eq!(a.try_recv().unwrap(), Outbound::Close);
        assert!(a.try_recv().is_err());
        assert!(!relay.is_attached(&"a".into()));
    }
}
