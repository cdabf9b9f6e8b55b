use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::room::admission::JoinIntent;
use crate::room::state::{ConnId, RoomId, SessionId};
use crate::sync::watch::WatchCommand;

/// Connection-negotiation blob exchanged between two peers. The server routes
/// it without looking inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NegotiationPayload(pub serde_json::Value);

/// Messages sent from a participant to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    RequestJoin {
        room: RoomId,
        name: String,
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<JoinIntent>,
    },
    AdminDecision {
        requester: ConnId,
        approve: bool,
    },
    Kick {
        target: ConnId,
    },
    Join {
        room: RoomId,
        session_id: SessionId,
        name: String,
    },
    Signal {
        to: ConnId,
        payload: NegotiationPayload,
    },
    WatchCommand {
        command: WatchCommand,
    },
    WatchUrl {
        url: String,
    },
    FilterUpdate {
        tag: String,
    },
    StartScreenShare,
    ToggleAudio {
        muted: bool,
    },
    Chat {
        text: String,
    },
    TypingStart,
    TypingStop,
    BrowserUpdate {
        url: String,
    },
}

/// Messages sent from the relay to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome {
        conn_id: ConnId,
    },
    Admitted {
        as_host: bool,
    },
    Rejected,
    RoomFull,
    RoomInactive,
    Kicked,
    JoinRequested {
        conn_id: ConnId,
        name: String,
    },
    MemberJoined {
        conn_id: ConnId,
        name: String,
    },
    MemberLeft {
        conn_id: ConnId,
    },
    HostChanged {
        is_host: bool,
    },
    Signal {
        from: ConnId,
        name: String,
        payload: NegotiationPayload,
    },
    WatchCommand {
        command: WatchCommand,
    },
    WatchUrl {
        url: String,
    },
    FilterUpdate {
        member: ConnId,
        tag: String,
    },
    ScreenShareStarted {
        member: ConnId,
    },
    AudioToggled {
        member: ConnId,
        muted: bool,
    },
    Chat {
        from: ConnId,
        name: String,
        text: String,
    },
    UserTyping {
        member: ConnId,
        name: String,
        typing: bool,
    },
    BrowserUpdate {
        url: String,
    },
    Error {
        message: String,
    },
}

/// WebSocket connection to the relay. Frames are pumped by two background
/// tasks; callers talk to it through channels.
pub struct SignalingClient {
    tx: mpsc::Sender<ClientMessage>,
    rx: mpsc::Receiver<ServerMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ClientMessage>(100);

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to encode signaling message");
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(signal) => {
                        if tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "ignoring malformed server frame"),
                }
            }
        });

        Ok(Self {
            tx: outgoing_tx,
            rx,
        })
    }

    /// Builds a client over existing channels; used to drive a `RoomClient`
    /// without a socket.
    pub fn from_channels(
        tx: mpsc::Sender<ClientMessage>,
        rx: mpsc::Receiver<ServerMessage>,
    ) -> Self {
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.tx.clone()
    }

    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| Error::Signaling(format!("Failed to send message: {}", e)))
    }

    /// Next message from the relay, or `None` once the socket is gone.
    pub async fn receive(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    pub fn split(self) -> (mpsc::Sender<ClientMessage>, mpsc::Receiver<ServerMessage>) {
        (self.tx, self.rx)
    }
}
