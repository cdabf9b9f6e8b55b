use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::transport::{
    PeerTransport, RemoteTrack, Role, TransportEvent, TransportEvents, TransportFactory,
    TransportState,
};
use crate::config::IceServer;
use crate::error::Result;
use crate::media::{LocalMedia, LocalTrack, TrackKind};
use crate::room::state::ConnId;
use crate::signaling::NegotiationPayload;

/// What travels inside a [`NegotiationPayload`] between two WebRTC peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RtcSignal {
    Description { description: RTCSessionDescription },
    Candidate { candidate: RTCIceCandidateInit },
}

impl RtcSignal {
    fn into_payload(self) -> Result<NegotiationPayload> {
        Ok(NegotiationPayload(serde_json::to_value(self)?))
    }

    fn from_payload(payload: NegotiationPayload) -> Result<Self> {
        Ok(serde_json::from_value(payload.0)?)
    }
}

/// Builds one `RTCPeerConnection` per remote participant.
#[derive(Debug, Clone)]
pub struct WebRtcFactory {
    ice_servers: Vec<IceServer>,
}

impl WebRtcFactory {
    pub fn new(ice_servers: Vec<IceServer>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create(
        &self,
        remote: &ConnId,
        role: Role,
        media: &LocalMedia,
        events: TransportEvents,
    ) -> Result<Box<dyn PeerTransport>> {
        let transport = WebRtcTransport::new(remote.clone(), &self.ice_servers, media, events).await?;
        debug!(remote = %remote, ?role, "peer connection created");
        Ok(Box::new(transport))
    }
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

pub struct WebRtcTransport {
    remote: ConnId,
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl WebRtcTransport {
    pub async fn new(
        remote: ConnId,
        ice_servers: &[IceServer],
        media: &LocalMedia,
        events: TransportEvents,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        let mut senders = HashMap::new();
        for track in [media.audio.as_ref(), media.video.as_ref()].into_iter().flatten() {
            let sender = peer_connection.add_track(track.rtc_track()).await?;
            senders.insert(track.kind(), sender);
        }

        let candidate_events = events.clone();
        let candidate_remote = remote.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            let remote = candidate_remote.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                let payload = candidate
                    .to_json()
                    .map_err(Into::into)
                    .and_then(|candidate| RtcSignal::Candidate { candidate }.into_payload());
                match payload {
                    Ok(payload) => {
                        let _ = events.send(TransportEvent::LocalSignal { remote, payload });
                    }
                    Err(e) => warn!(remote = %remote, error = %e, "failed to encode ICE candidate"),
                }
            })
        }));

        let track_events = events.clone();
        let track_remote = remote.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                let remote = track_remote.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        _ => return,
                    };
                    let _ = events.send(TransportEvent::RemoteTrack {
                        remote,
                        track: RemoteTrack {
                            id: track.id(),
                            stream_id: track.stream_id(),
                            kind,
                            track: Some(track),
                        },
                    });
                })
            },
        ));

        let state_remote = remote.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let events = events.clone();
                let remote = state_remote.clone();
                Box::pin(async move {
                    info!(remote = %remote, state = %s, "peer connection state changed");
                    let state = match s {
                        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                            TransportState::New
                        }
                        RTCPeerConnectionState::Connecting => TransportState::Connecting,
                        RTCPeerConnectionState::Connected => TransportState::Connected,
                        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                        RTCPeerConnectionState::Failed => TransportState::Failed,
                        RTCPeerConnectionState::Closed => TransportState::Closed,
                    };
                    let _ = events.send(TransportEvent::StateChanged { remote, state });
                })
            },
        ));

        Ok(Self {
            remote,
            peer_connection,
            senders: Mutex::new(senders),
            pending_candidates: Mutex::new(Vec::new()),
        })
    }

    async fn flush_candidates(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending_candidates.lock().await);
        for candidate in pending {
            self.peer_connection.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<NegotiationPayload> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        RtcSignal::Description { description: offer }.into_payload()
    }

    async fn apply_remote(&self, payload: NegotiationPayload) -> Result<Option<NegotiationPayload>> {
        match RtcSignal::from_payload(payload)? {
            RtcSignal::Description { description } => {
                let is_offer = description.sdp_type == RTCSdpType::Offer;
                self.peer_connection
                    .set_remote_description(description)
                    .await?;
                self.flush_candidates().await?;
                if !is_offer {
                    return Ok(None);
                }
                let answer = self.peer_connection.create_answer(None).await?;
                self.peer_connection
                    .set_local_description(answer.clone())
                    .await?;
                Ok(Some(
                    RtcSignal::Description {
                        description: answer,
                    }
                    .into_payload()?,
                ))
            }
            RtcSignal::Candidate { candidate } => {
                if self.peer_connection.remote_description().await.is_none() {
                    self.pending_candidates.lock().await.push(candidate);
                } else {
                    self.peer_connection.add_ice_candidate(candidate).await?;
                }
                Ok(None)
            }
        }
    }

    async fn replace_track(&self, kind: TrackKind, track: Option<Arc<dyn LocalTrack>>) -> Result<()> {
        let mut senders = self.senders.lock().await;
        if let Some(sender) = senders.get(&kind) {
            sender.replace_track(track.map(|t| t.rtc_track())).await?;
            return Ok(());
        }
        if let Some(track) = track {
            // No m-line for this kind yet; the remote only sees it after renegotiation.
            warn!(remote = %self.remote, %kind, "adding track without renegotiation");
            let sender = self.peer_connection.add_track(track.rtc_track()).await?;
            senders.insert(kind, sender);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::CapturedTrack;
    use tokio::sync::mpsc;

    #[test]
    fn every_ice_server_keeps_its_credentials() {
        let stun = rtc_ice_server(&IceServer::stun("stun:stun.example.org"));
        assert_eq!(stun.urls, vec!["stun:stun.example.org".to_string()]);
        assert!(stun.username.is_empty());

        let turn = rtc_ice_server(&IceServer::turn(
            vec!["turn:relay.example.org:80".into()],
            "ana",
            "secret",
        ));
        assert_eq!(turn.username, "ana");
        assert_eq!(turn.credential, "secret");
    }

    #[tokio::test]
    async fn offer_answer_between_two_local_peers() {
        let (events, _rx) = mpsc::unbounded_channel();
        let media = LocalMedia {
            audio: Some(Arc::new(CapturedTrack::new(TrackKind::Audio, "mic", "a"))),
            video: Some(Arc::new(CapturedTrack::new(TrackKind::Video, "cam", "a"))),
        };
        let offerer = WebRtcTransport::new("b".into(), &[], &media, events.clone())
            .await
            .unwrap();
        let answerer = WebRtcTransport::new("a".into(), &[], &LocalMedia::default(), events)
            .await
            .unwrap();

        let offer = offerer.create_offer().await.unwrap();
        assert_eq!(offer.0["kind"], "description");
        assert_eq!(offer.0["description"]["type"], "offer");

        let answer = answerer.apply_remote(offer).await.unwrap().unwrap();
        assert_eq!(answer.0["description"]["type"], "answer");
        assert!(offerer.apply_remote(answer).await.unwrap().is_none());

        let replacement: Arc<dyn LocalTrack> =
            Arc::new(CapturedTrack::new(TrackKind::Video, "screen", "a"));
        offerer
            .replace_track(TrackKind::Video, Some(replacement))
            .await
            .unwrap();

        offerer.close().await.unwrap();
        answerer.close().await.unwrap();
    }
}
