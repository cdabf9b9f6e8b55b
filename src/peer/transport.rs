use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;
use crate::media::{LocalMedia, LocalTrack, TrackKind};
use crate::room::state::ConnId;
use crate::signaling::NegotiationPayload;

/// Which side of the pair sends the first offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    pub track: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Things a transport reports on its own schedule, after the call that
/// created it has returned.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A trickled payload (e.g. an ICE candidate) to forward to the remote.
    LocalSignal {
        remote: ConnId,
        payload: NegotiationPayload,
    },
    RemoteTrack {
        remote: ConnId,
        track: RemoteTrack,
    },
    StateChanged {
        remote: ConnId,
        state: TransportState,
    },
}

pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// One negotiated media transport to one remote participant.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<NegotiationPayload>;

    /// Applies a payload from the remote side and returns the reply to send
    /// back, if the payload calls for one.
    async fn apply_remote(&self, payload: NegotiationPayload) -> Result<Option<NegotiationPayload>>;

    /// Swaps the outgoing component of `kind` within the existing session.
    async fn replace_track(&self, kind: TrackKind, track: Option<Arc<dyn LocalTrack>>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        remote: &ConnId,
        role: Role,
        media: &LocalMedia,
        events: TransportEvents,
    ) -> Result<Box<dyn PeerTransport>>;
}
