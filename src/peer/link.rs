use std::fmt;
use std::time::{Duration, Instant};

use super::transport::{PeerTransport, RemoteTrack, Role};
use crate::room::state::ConnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Descriptions and candidates are still being exchanged.
    Negotiating,
    /// Remote media has arrived.
    Connected,
    Failed,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Negotiating => write!(f, "negotiating"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Failed => write!(f, "failed"),
            LinkState::Closed => write!(f, "closed"),
        }
    }
}

/// The last known media stream received from a remote participant.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    fn new(stream_id: String) -> Self {
        Self {
            stream_id,
            tracks: Vec::new(),
        }
    }

    /// Adds a track, replacing an earlier one of the same kind.
    fn insert(&mut self, track: RemoteTrack) {
        self.tracks.retain(|t| t.kind != track.kind);
        self.tracks.push(track);
    }
}

/// One negotiated transport to one remote participant, owned by the
/// [`PeerManager`](super::PeerManager).
pub struct PeerLink {
    remote: ConnId,
    name: String,
    role: Role,
    state: LinkState,
    transport: Box<dyn PeerTransport>,
    stream: Option<RemoteStream>,
    created_at: Instant,
}

impl PeerLink {
    pub(crate) fn new(remote: ConnId, name: String, role: Role, transport: Box<dyn PeerTransport>) -> Self {
        Self {
            remote,
            name,
            role,
            state: LinkState::Negotiating,
            transport,
            stream: None,
            created_at: Instant::now(),
        }
    }

    pub fn remote(&self) -> &ConnId {
        &self.remote
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stream(&self) -> Option<&RemoteStream> {
        self.stream.as_ref()
    }

    pub(crate) fn transport(&self) -> &dyn PeerTransport {
        self.transport.as_ref()
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        if self.name.is_empty() {
            self.name = name.to_string();
        }
    }

    pub(crate) fn set_state(&mut self, state: LinkState) {
        self.state = state;
    }

    /// Records a received track. Returns true if this moved the link to
    /// `Connected`.
    pub(crate) fn add_track(&mut self, track: RemoteTrack) -> bool {
        let stream_id = track.stream_id.clone();
        match &mut self.stream {
            Some(stream) if stream.stream_id == stream_id => stream.insert(track),
            _ => {
                let mut stream = RemoteStream::new(stream_id);
                stream.insert(track);
                self.stream = Some(stream);
            }
        }
        if self.state == LinkState::Negotiating {
            self.state = LinkState::Connected;
            return true;
        }
        false
    }

    pub(crate) fn is_stalled(&self, now: Instant, deadline: Duration) -> bool {
        self.state == LinkState::Negotiating && now.saturating_duration_since(self.created_at) >= deadline
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("remote", &self.remote)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("stream", &self.stream)
            .finish()
    }
}
