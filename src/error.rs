use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

/// Terminal outcomes of a join attempt. The client must start over with a
/// fresh `request-join` after any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionFailure {
    Rejected,
    RoomFull,
    RoomInactive,
    Kicked,
}

impl fmt::Display for AdmissionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionFailure::Rejected => write!(f, "the host denied the join request"),
            AdmissionFailure::RoomFull => write!(f, "room is full"),
            AdmissionFailure::RoomInactive => write!(f, "room is not active"),
            AdmissionFailure::Kicked => write!(f, "removed from the room by the host"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Signaling channel closed")]
    ChannelClosed,

    #[error("Admission failed: {0}")]
    Admission(AdmissionFailure),

    #[error("No admission decision within {0:?}")]
    AdmissionTimeout(Duration),

    #[error("Media error: {0}")]
    Media(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

pub type Result<T> = std::result::Result<T, Error>;
