//! Client-side peer lifecycle: one negotiated transport per remote participant.

pub mod link;
pub mod manager;
pub mod rtc;
pub mod transport;

pub use link::{LinkState, PeerLink, RemoteStream};
pub use manager::{PeerEvent, PeerManager};
pub use rtc::WebRtcFactory;
pub use transport::{PeerTransport, RemoteTrack, Role, TransportEvent, TransportFactory, TransportState};
