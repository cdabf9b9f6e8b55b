use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::link::{LinkState, PeerLink};
use super::transport::{
    RemoteTrack, Role, TransportEvent, TransportEvents, TransportFactory, TransportState,
};
use crate::config::DEFAULT_NEGOTIATION_TIMEOUT;
use crate::error::Result;
use crate::media::{LocalMedia, LocalTrack, TrackKind};
use crate::room::state::ConnId;
use crate::signaling::{ClientMessage, NegotiationPayload};

/// What the peer manager reports to its collaborator (usually the UI).
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LinkOpened {
        remote: ConnId,
        name: String,
        role: Role,
    },
    RemoteStream {
        remote: ConnId,
        stream_id: String,
        track: RemoteTrack,
    },
    LinkClosed {
        remote: ConnId,
    },
    /// The link will not reach a connected state on its own. Nothing is retried.
    NegotiationFailed {
        remote: ConnId,
        reason: String,
    },
}

/// Owns one [`PeerLink`] per remote participant and the local outgoing media.
pub struct PeerManager {
    factory: Arc<dyn TransportFactory>,
    signals: mpsc::Sender<ClientMessage>,
    events: mpsc::UnboundedSender<PeerEvent>,
    transport_events: TransportEvents,
    links: HashMap<ConnId, PeerLink>,
    local: LocalMedia,
    negotiation_timeout: Duration,
}

impl PeerManager {
    /// Returns the manager and the receiver of transport events, which the
    /// owner must feed back through [`PeerManager::on_transport_event`].
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        signals: mpsc::Sender<ClientMessage>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport_events, transport_rx) = mpsc::unbounded_channel();
        (
            Self {
                factory,
                signals,
                events,
                transport_events,
                links: HashMap::new(),
                local: LocalMedia::default(),
                negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            },
            transport_rx,
        )
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn link(&self, remote: &ConnId) -> Option<&PeerLink> {
        self.links.get(remote)
    }

    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn local_media(&self) -> &LocalMedia {
        &self.local
    }

    /// Installs the outgoing media that new links are created with. Tracks it
    /// displaces are stopped.
    pub fn set_local_media(&mut self, media: LocalMedia) {
        let old = std::mem::replace(&mut self.local, media);
        for (kind, track) in [(TrackKind::Audio, old.audio), (TrackKind::Video, old.video)] {
            if let Some(track) = track {
                if self.local.track(kind).map(|t| t.id()) != Some(track.id()) {
                    track.stop();
                }
            }
        }
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    async fn send_signal(&self, to: &ConnId, payload: NegotiationPayload) -> Result<()> {
        self.signals
            .send(ClientMessage::Signal {
                to: to.clone(),
                payload,
            })
            .await?;
        Ok(())
    }

    fn fail(&mut self, remote: &ConnId, reason: String) {
        warn!(remote = %remote, %reason, "negotiation failed");
        if let Some(link) = self.links.get_mut(remote) {
            link.set_state(LinkState::Failed);
        }
        self.emit(PeerEvent::NegotiationFailed {
            remote: remote.clone(),
            reason,
        });
    }

    async fn open_link(&mut self, remote: &ConnId, name: &str, role: Role) -> bool {
        let transport = match self
            .factory
            .create(remote, role, &self.local, self.transport_events.clone())
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                self.fail(remote, e.to_string());
                return false;
            }
        };
        info!(remote = %remote, name, ?role, "peer link opened");
        self.links.insert(
            remote.clone(),
            PeerLink::new(remote.clone(), name.to_string(), role, transport),
        );
        self.emit(PeerEvent::LinkOpened {
            remote: remote.clone(),
            name: name.to_string(),
            role,
        });
        true
    }

    /// A participant joined after us: we are the initiator for this pair.
    pub async fn on_member_joined(&mut self, remote: &ConnId, name: &str) -> Result<()> {
        if self.links.contains_key(remote) {
            debug!(remote = %remote, "member already linked");
            return Ok(());
        }
        if !self.open_link(remote, name, Role::Initiator).await {
            return Ok(());
        }
        let offer = match self.links.get(remote) {
            Some(link) => link.transport().create_offer().await,
            None => return Ok(()),
        };
        match offer {
            Ok(offer) => self.send_signal(remote, offer).await,
            Err(e) => {
                self.fail(remote, e.to_string());
                Ok(())
            }
        }
    }

    /// Feeds a relayed payload into the link for `from`, creating it as
    /// responder on first contact.
    pub async fn on_signal(&mut self, from: &ConnId, name: &str, payload: NegotiationPayload) -> Result<()> {
        if let Some(link) = self.links.get_mut(from) {
            link.set_name(name);
        } else if !self.open_link(from, name, Role::Responder).await {
            return Ok(());
        }
        let Some(link) = self.links.get(from) else {
            return Ok(());
        };
        if matches!(link.state(), LinkState::Failed | LinkState::Closed) {
            debug!(remote = %from, state = %link.state(), "dropping payload for inactive link");
            return Ok(());
        }
        let applied = link.transport().apply_remote(payload).await;
        match applied {
            Ok(Some(reply)) => self.send_signal(from, reply).await,
            Ok(None) => Ok(()),
            Err(e) => {
                self.fail(from, e.to_string());
                Ok(())
            }
        }
    }

    pub async fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::LocalSignal { remote, payload } => {
                let active = self
                    .links
                    .get(&remote)
                    .is_some_and(|link| link.state() != LinkState::Closed);
                if active {
                    self.send_signal(&remote, payload).await?;
                }
            }
            TransportEvent::RemoteTrack { remote, track } => {
                let Some(link) = self.links.get_mut(&remote) else {
                    return Ok(());
                };
                if link.add_track(track.clone()) {
                    info!(remote = %remote, "peer link connected");
                }
                self.emit(PeerEvent::RemoteStream {
                    remote,
                    stream_id: track.stream_id.clone(),
                    track,
                });
            }
            TransportEvent::StateChanged { remote, state } => {
                let Some(link) = self.links.get_mut(&remote) else {
                    return Ok(());
                };
                match state {
                    TransportState::Connected if link.state() == LinkState::Negotiating => {
                        link.set_state(LinkState::Connected);
                        info!(remote = %remote, "peer link connected");
                    }
                    TransportState::Failed if link.state() != LinkState::Failed => {
                        self.fail(&remote, "transport failed".to_string());
                    }
                    other => debug!(remote = %remote, state = ?other, "transport state"),
                }
            }
        }
        Ok(())
    }

    /// Tears down the link for `remote`. Unknown remotes are ignored.
    pub async fn on_member_left(&mut self, remote: &ConnId) {
        let Some(mut link) = self.links.remove(remote) else {
            return;
        };
        link.set_state(LinkState::Closed);
        if let Err(e) = link.transport().close().await {
            warn!(remote = %remote, error = %e, "error closing peer transport");
        }
        info!(remote = %remote, "peer link closed");
        self.emit(PeerEvent::LinkClosed {
            remote: remote.clone(),
        });
    }

    /// Swaps the outgoing `kind` component on every existing link without
    /// renegotiating. The displaced track is stopped once.
    pub async fn replace_track(&mut self, kind: TrackKind, track: Option<Arc<dyn LocalTrack>>) {
        let swaps = self.links.values().map(|link| {
            let track = track.clone();
            async move { (link.remote(), link.transport().replace_track(kind, track).await) }
        });
        for (remote, result) in join_all(swaps).await {
            if let Err(e) = result {
                warn!(remote = %remote, %kind, error = %e, "track replacement failed");
            }
        }
        let old = std::mem::replace(self.local.slot(kind), track);
        if let Some(old) = old {
            let same = self.local.track(kind).is_some_and(|t| t.id() == old.id());
            if !same {
                old.stop();
            }
        }
    }

    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        if let Some(track) = self.local.track(kind) {
            track.set_enabled(enabled);
        }
    }

    /// Fails every link still negotiating past the deadline. Returns the
    /// affected remotes.
    pub fn expire_stalled(&mut self, now: Instant) -> Vec<ConnId> {
        let stalled: Vec<ConnId> = self
            .links
            .values()
            .filter(|link| link.is_stalled(now, self.negotiation_timeout))
            .map(|link| link.remote().clone())
            .collect();
        for remote in &stalled {
            self.fail(remote, format!("not connected after {:?}", self.negotiation_timeout));
        }
        stalled
    }

    /// Closes every link and releases local media.
    pub async fn close_all(&mut self) {
        let remotes: Vec<ConnId> = self.links.keys().cloned().collect();
        for remote in remotes {
            self.on_member_left(&remote).await;
        }
        self.local.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::media::CapturedTrack;
    use crate::peer::transport::PeerTransport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeTransport {
        remote: ConnId,
        log: Log,
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn create_offer(&self) -> Result<NegotiationPayload> {
            Ok(NegotiationPayload(json!({"sdp": "offer"})))
        }

        async fn apply_remote(&self, payload: NegotiationPayload) -> Result<Option<NegotiationPayload>> {
            match payload.0["sdp"].as_str() {
                Some("offer") => Ok(Some(NegotiationPayload(json!({"sdp": "answer"})))),
                Some("garbage") => Err(Error::Signaling("unparseable description".into())),
                _ => Ok(None),
            }
        }

        async fn replace_track(&self, kind: TrackKind, track: Option<Arc<dyn LocalTrack>>) -> Result<()> {
            let id = track.map(|t| t.id().to_string()).unwrap_or_default();
            self.log
                .lock()
                .unwrap()
                .push(format!("replace {} {kind} {id}", self.remote));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("close {}", self.remote));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        log: Log,
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn create(
            &self,
            remote: &ConnId,
            role: Role,
            _media: &LocalMedia,
            _events: TransportEvents,
        ) -> Result<Box<dyn PeerTransport>> {
            self.log
                .lock()
                .unwrap()
                .push(format!("create {remote} {role:?}"));
            Ok(Box::new(FakeTransport {
                remote: remote.clone(),
                log: Arc::clone(&self.log),
            }))
        }
    }

    struct Harness {
        peers: PeerManager,
        log: Log,
        signals: mpsc::Receiver<ClientMessage>,
        events: mpsc::UnboundedReceiver<PeerEvent>,
    }

    fn harness() -> Harness {
        let factory = FakeFactory::default();
        let log = Arc::clone(&factory.log);
        let (signal_tx, signals) = mpsc::channel(16);
        let (event_tx, events) = mpsc::unbounded_channel();
        let (peers, _transport_rx) = PeerManager::new(Arc::new(factory), signal_tx, event_tx);
        Harness {
            peers,
            log,
            signals,
            events,
        }
    }

    fn video(id: &str) -> Arc<dyn LocalTrack> {
        Arc::new(CapturedTrack::new(TrackKind::Video, id, "local"))
    }

    fn remote_track(kind: TrackKind) -> RemoteTrack {
        RemoteTrack {
            id: format!("{kind}-1"),
            stream_id: "stream-b".into(),
            kind,
            track: None,
        }
    }

    #[tokio::test]
    async fn new_member_gets_an_offer_from_us() {
        let mut h = harness();
        h.peers.on_member_joined(&"b".into(), "Bo").await.unwrap();

        let link = h.peers.link(&"b".into()).unwrap();
        assert_eq!(link.role(), Role::Initiator);
        assert_eq!(link.state(), LinkState::Negotiating);
        assert_eq!(
            h.signals.recv().await.unwrap(),
            ClientMessage::Signal {
                to: "b".into(),
                payload: NegotiationPayload(json!({"sdp": "offer"})),
            }
        );
        assert!(matches!(
            h.events.recv().await.unwrap(),
            PeerEvent::LinkOpened { role: Role::Initiator, .. }
        ));
    }

    #[tokio::test]
    async fn unsolicited_offer_creates_responder_and_answers() {
        let mut h = harness();
        h.peers
            .on_signal(&"a".into(), "Ana", NegotiationPayload(json!({"sdp": "offer"})))
            .await
            .unwrap();

        let link = h.peers.link(&"a".into()).unwrap();
        assert_eq!(link.role(), Role::Responder);
        assert_eq!(link.name(), "Ana");
        assert_eq!(
            h.signals.recv().await.unwrap(),
            ClientMessage::Signal {
                to: "a".into(),
                payload: NegotiationPayload(json!({"sdp": "answer"})),
            }
        );
    }

    #[tokio::test]
    async fn duplicate_presence_does_not_create_a_second_link() {
        let mut h = harness();
        h.peers.on_member_joined(&"b".into(), "Bo").await.unwrap();
        h.peers.on_member_joined(&"b".into(), "Bo").await.unwrap();
        assert_eq!(h.peers.len(), 1);
        let creates = h.log.lock().unwrap().iter().filter(|l| l.starts_with("create")).count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn remote_track_marks_link_connected() {
        let mut h = harness();
        h.peers.on_member_joined(&"b".into(), "Bo").await.unwrap();
        h.peers
            .on_transport_event(TransportEvent::RemoteTrack {
                remote: "b".into(),
                track: remote_track(TrackKind::Video),
            })
            .await
            .unwrap();
        h.peers
            .on_transport_event(TransportEvent::RemoteTrack {
                remote: "b".into(),
                track: remote_track(TrackKind::Audio),
            })
            .await
            .unwrap();

        let link = h.peers.link(&"b".into()).unwrap();
        assert_eq!(link.state(), LinkState::Connected);
        let stream = link.stream().unwrap();
        assert_eq!(stream.stream_id, "stream-b");
        assert_eq!(stream.tracks.len(), 2);
    }

    #[tokio::test]
    async fn trickled_candidates_are_forwarded() {
        let mut h = harness();
        h.peers.on_member_joined(&"b".into(), "Bo").await.unwrap();
        let _offer = h.signals.recv().await.unwrap();
        h.peers
            .on_transport_event(TransportEvent::LocalSignal {
                remote: "b".into(),
                payload: NegotiationPayload(json!({"candidate": "c1"})),
            })
            .await
            .unwrap();
        assert!(matches!(
            h.signals.recv().await.unwrap(),
            ClientMessage::Signal { to, .. } if to.as_str() == "b"
        ));
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let mut h = harness();
        h.peers.on_member_joined(&"b".into(), "Bo").await.unwrap();
        h.peers.on_member_left(&"b".into()).await;
        h.peers.on_member_left(&"b".into()).await;
        h.peers.on_member_left(&"never-seen".into()).await;

        assert!(h.peers.is_empty());
        let closes = h.log.lock().unwrap().iter().filter(|l| l.starts_with("close")).count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn video_swap_reuses_every_link_and_stops_old_track_once() {
        let mut h = harness();
        let camera = video("camera");
        h.peers.set_local_media(LocalMedia {
            audio: None,
            video: Some(Arc::clone(&camera)),
        });
        h.peers.on_member_joined(&"b".into(), "Bo").await.unwrap();
        h.peers.on_member_joined(&"c".into(), "Cy").await.unwrap();

        let screen = video("screen");
        h.peers.replace_track(TrackKind::Video, Some(Arc::clone(&screen))).await;

        assert!(camera.is_stopped());
        assert!(!screen.is_stopped());
        let log = h.log.lock().unwrap().clone();
        assert_eq!(log.iter().filter(|l| l.starts_with("create")).count(), 2);
        assert!(log.contains(&"replace b video screen".to_string()));
        assert!(log.contains(&"replace c video screen".to_string()));
        assert_eq!(
            h.peers.local_media().video.as_ref().map(|t| t.id().to_string()),
            Some("screen".into())
        );
    }

    #[tokio::test]
    async fn replacing_with_same_track_does_not_stop_it() {
        let mut h = harness();
        let camera = video("camera");
        h.peers.set_local_media(LocalMedia {
            audio: None,
            video: Some(Arc::clone(&camera)),
        });
        h.peers.replace_track(TrackKind::Video, Some(Arc::clone(&camera))).await;
        assert!(!camera.is_stopped());
    }

    #[tokio::test]
    async fn stalled_negotiation_is_reported_once() {
        let mut h = harness();
        h.peers = h.peers.with_negotiation_timeout(Duration::from_secs(30));
        h.peers.on_member_joined(&"b".into(), "Bo").await.unwrap();
        let _opened = h.events.recv().await.unwrap();

        assert!(h.peers.expire_stalled(Instant::now()).is_empty());
        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(h.peers.expire_stalled(later), vec![ConnId::from("b")]);
        assert!(h.peers.expire_stalled(later).is_empty());
        assert_eq!(h.peers.link(&"b".into()).unwrap().state(), LinkState::Failed);
        assert!(matches!(
            h.events.recv().await.unwrap(),
            PeerEvent::NegotiationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn bad_payload_fails_the_link_without_retry() {
        let mut h = harness();
        h.peers
            .on_signal(&"a".into(), "Ana", NegotiationPayload(json!({"sdp": "garbage"})))
            .await
            .unwrap();
        assert_eq!(h.peers.link(&"a".into()).unwrap().state(), LinkState::Failed);
        assert!(h.signals.try_recv().is_err());
    }
}
