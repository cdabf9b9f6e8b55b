pub mod admission;
pub mod registry;
pub mod session;
pub mod state;

pub use admission::{AdmissionController, Handover, JoinIntent, JoinRequest, RequestOutcome};
pub use registry::{Departure, Registration, RoomRegistry};
pub use session::SessionDeduplicator;
pub use state::{ConnId, Member, Room, RoomId, SessionId, ROOM_CAPACITY};
