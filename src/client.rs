use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{AdmissionFailure, Error, Result};
use crate::media::{Acquired, LocalMedia, MediaController, MediaSource, Resolution, TrackKind};
use crate::peer::{PeerEvent, PeerManager, TransportEvent, TransportFactory};
use crate::room::state::ConnId;
use crate::signaling::{ClientMessage, ServerMessage, SignalingClient};
use crate::sync::{FilterBook, PlaybackState, WatchCommand, WatchParty};

const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a UI collaborator needs to render.
#[derive(Debug)]
pub enum RoomEvent {
    JoinRequested { conn_id: ConnId, name: String },
    MemberJoined { conn_id: ConnId, name: String },
    MemberLeft { conn_id: ConnId },
    HostChanged { is_host: bool },
    Peer(PeerEvent),
    /// The local player must be driven to this state.
    Playback(PlaybackState),
    FilterChanged { member: ConnId, tag: String },
    AudioToggled { member: ConnId, muted: bool },
    ScreenShareStarted { member: ConnId },
    ScreenShareStopped,
    Chat { from: ConnId, name: String, text: String },
    Typing { member: ConnId, name: String, typing: bool },
    BrowserUpdate { url: String },
    MediaFailed(String),
    Kicked,
    ServerError(String),
}

/// User actions fed into [`RoomClient::run`].
#[derive(Debug, Clone)]
pub enum RoomCommand {
    Approve(ConnId),
    Deny(ConnId),
    Kick(ConnId),
    /// A state change reported by the local player.
    Watch(WatchCommand),
    WatchUrl(String),
    Filter(String),
    FlipCamera,
    StartScreenShare,
    StopScreenShare,
    SetAudio(bool),
    SetVideo(bool),
    /// Whether the user is composing a chat message.
    Typing(bool),
    Chat(String),
    BrowserUrl(String),
    Leave,
}

/// One participant's side of a room: admission, peer links, local media and
/// the shared watch/filter state.
pub struct RoomClient {
    config: ClientConfig,
    signaling: mpsc::Sender<ClientMessage>,
    inbound: mpsc::Receiver<ServerMessage>,
    conn_id: Option<ConnId>,
    is_host: bool,
    typing: bool,
    peers: PeerManager,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    media: MediaController,
    acquisitions: mpsc::UnboundedReceiver<Acquired>,
    watch: WatchParty,
    filters: FilterBook,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl RoomClient {
    pub fn new(
        config: ClientConfig,
        signaling: SignalingClient,
        factory: Arc<dyn TransportFactory>,
        source: Arc<dyn MediaSource>,
    ) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (signaling, inbound) = signaling.split();
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let (peers, transport_events) = PeerManager::new(factory, signaling.clone(), peer_tx);
        let peers = peers.with_negotiation_timeout(config.negotiation_timeout);
        let (media, acquisitions) = MediaController::new(source);
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                signaling,
                inbound,
                conn_id: None,
                is_host: false,
                typing: false,
                peers,
                peer_events,
                transport_events,
                media,
                acquisitions,
                watch: WatchParty::new(),
                filters: FilterBook::new(),
                events,
            },
            events_rx,
        )
    }

    pub fn conn_id(&self) -> Option<&ConnId> {
        self.conn_id.as_ref()
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }

    pub fn watch(&self) -> &WatchParty {
        &self.watch
    }

    pub fn filters(&self) -> &FilterBook {
        &self.filters
    }

    pub fn media(&self) -> &MediaController {
        &self.media
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    fn drain_peer_events(&mut self) {
        while let Ok(event) = self.peer_events.try_recv() {
            let _ = self.events.send(RoomEvent::Peer(event));
        }
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.signaling.send(msg).await?;
        Ok(())
    }

    /// Opens the microphone and camera. A device that cannot be opened is
    /// reported and left out; the participant can still receive.
    pub async fn open_local_media(&mut self) -> Result<()> {
        let source = Arc::clone(self.media.source());
        let mut local = LocalMedia::default();
        match source.open_microphone().await {
            Ok(track) => {
                track.set_enabled(self.media.audio_enabled());
                local.audio = Some(track);
            }
            Err(e) => self.emit(RoomEvent::MediaFailed(e.to_string())),
        }
        match source.open_camera(self.media.facing()).await {
            Ok(track) => {
                track.set_enabled(self.media.video_enabled());
                local.video = Some(track);
            }
            Err(e) => self.emit(RoomEvent::MediaFailed(e.to_string())),
        }
        self.peers.set_local_media(local);
        Ok(())
    }

    /// Asks to enter the room and waits for the host's decision. Returns
    /// whether this participant is Host. Every failure is terminal: the
    /// caller must reconnect and start over.
    pub async fn join(&mut self) -> Result<bool> {
        self.send(ClientMessage::RequestJoin {
            room: self.config.room.clone(),
            name: self.config.name.clone(),
            session_id: self.config.session_id.clone(),
            intent: self.config.intent,
        })
        .await?;

        let limit = self.config.admission_timeout;
        let as_host = match timeout(limit, self.await_admission()).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                warn!(room = %self.config.room, "no admission decision within {:?}", limit);
                return Err(Error::AdmissionTimeout(limit));
            }
        };

        self.send(ClientMessage::Join {
            room: self.config.room.clone(),
            session_id: self.config.session_id.clone(),
            name: self.config.name.clone(),
        })
        .await?;
        self.is_host = as_host;
        info!(room = %self.config.room, as_host, "joined room");
        Ok(as_host)
    }

    async fn await_admission(&mut self) -> Result<bool> {
        loop {
            let msg = self.inbound.recv().await.ok_or(Error::ChannelClosed)?;
            let failure = match msg {
                ServerMessage::Welcome { conn_id } => {
                    self.conn_id = Some(conn_id);
                    continue;
                }
                ServerMessage::Admitted { as_host } => return Ok(as_host),
                ServerMessage::Rejected => AdmissionFailure::Rejected,
                ServerMessage::RoomFull => AdmissionFailure::RoomFull,
                ServerMessage::RoomInactive => AdmissionFailure::RoomInactive,
                ServerMessage::Kicked => AdmissionFailure::Kicked,
                ServerMessage::Error { message } => return Err(Error::Signaling(message)),
                other => {
                    debug!(?other, "ignoring message while awaiting admission");
                    continue;
                }
            };
            info!(room = %self.config.room, %failure, "join attempt ended");
            return Err(Error::Admission(failure));
        }
    }

    fn is_self(&self, conn_id: &ConnId) -> bool {
        self.conn_id.as_ref() == Some(conn_id)
    }

    /// Applies one relay message. Returns false once this participant has
    /// been removed from the room.
    pub async fn handle_server_message(&mut self, msg: ServerMessage) -> Result<bool> {
        match msg {
            ServerMessage::Welcome { conn_id } => self.conn_id = Some(conn_id),
            ServerMessage::Admitted { as_host } => {
                debug!(as_host, "late admission ignored");
            }
            other @ (ServerMessage::Rejected | ServerMessage::RoomFull | ServerMessage::RoomInactive) => {
                self.emit(RoomEvent::ServerError(format!("unexpected {other:?}")));
            }
            ServerMessage::Kicked => {
                info!(room = %self.config.room, "kicked by host");
                self.emit(RoomEvent::Kicked);
                self.peers.close_all().await;
                self.drain_peer_events();
                return Ok(false);
            }
            ServerMessage::JoinRequested { conn_id, name } => {
                self.emit(RoomEvent::JoinRequested { conn_id, name });
            }
            ServerMessage::MemberJoined { conn_id, name } => {
                if !self.is_self(&conn_id) {
                    self.peers.on_member_joined(&conn_id, &name).await?;
                    if let Some(tag) = self.filters.resync() {
                        self.send(ClientMessage::FilterUpdate { tag }).await?;
                    }
                    self.emit(RoomEvent::MemberJoined { conn_id, name });
                }
            }
            ServerMessage::MemberLeft { conn_id } => {
                self.peers.on_member_left(&conn_id).await;
                self.filters.remove(&conn_id);
                self.emit(RoomEvent::MemberLeft { conn_id });
            }
            ServerMessage::HostChanged { is_host } => {
                self.is_host = is_host;
                self.emit(RoomEvent::HostChanged { is_host });
            }
            ServerMessage::Signal {
                from,
                name,
                payload,
            } => {
                self.peers.on_signal(&from, &name, payload).await?;
            }
            ServerMessage::WatchCommand { command } => {
                if self.watch.apply_remote(command) {
                    self.emit(RoomEvent::Playback(self.watch.state().clone()));
                }
            }
            ServerMessage::WatchUrl { url } => {
                if self.watch.apply_remote_url(url) {
                    self.emit(RoomEvent::Playback(self.watch.state().clone()));
                }
            }
            ServerMessage::FilterUpdate { member, tag } => {
                self.filters.apply_remote(member.clone(), tag.clone());
                self.emit(RoomEvent::FilterChanged { member, tag });
            }
            ServerMessage::ScreenShareStarted { member } => {
                if !self.is_self(&member) && self.media.stop_screen_share() {
                    info!(other = %member, "another member started sharing; stopping ours");
                    self.emit(RoomEvent::ScreenShareStopped);
                }
                self.emit(RoomEvent::ScreenShareStarted { member });
            }
            ServerMessage::AudioToggled { member, muted } => {
                self.emit(RoomEvent::AudioToggled { member, muted });
            }
            ServerMessage::Chat { from, name, text } => {
                self.emit(RoomEvent::Chat { from, name, text });
            }
            ServerMessage::UserTyping {
                member,
                name,
                typing,
            } => {
                self.emit(RoomEvent::Typing {
                    member,
                    name,
                    typing,
                });
            }
            ServerMessage::BrowserUpdate { url } => {
                self.emit(RoomEvent::BrowserUpdate { url });
            }
            ServerMessage::Error { message } => {
                warn!(%message, "relay reported an error");
                self.emit(RoomEvent::ServerError(message));
            }
        }
        self.drain_peer_events();
        Ok(true)
    }

    /// Returns false when the user asked to leave.
    pub async fn handle_command(&mut self, command: RoomCommand) -> Result<bool> {
        match command {
            RoomCommand::Approve(requester) => {
                self.send(ClientMessage::AdminDecision {
                    requester,
                    approve: true,
                })
                .await?
            }
            RoomCommand::Deny(requester) => {
                self.send(ClientMessage::AdminDecision {
                    requester,
                    approve: false,
                })
                .await?
            }
            RoomCommand::Kick(target) => self.send(ClientMessage::Kick { target }).await?,
            RoomCommand::Watch(change) => {
                if let Some(command) = self.watch.local_change(change) {
                    self.send(ClientMessage::WatchCommand { command }).await?;
                }
            }
            RoomCommand::WatchUrl(url) => {
                if let Some(url) = self.watch.set_url(url) {
                    self.send(ClientMessage::WatchUrl { url }).await?;
                }
            }
            RoomCommand::Filter(tag) => {
                if let Some(tag) = self.filters.set_local(tag) {
                    self.send(ClientMessage::FilterUpdate { tag }).await?;
                }
            }
            RoomCommand::FlipCamera => {
                self.media.flip_camera();
            }
            RoomCommand::StartScreenShare => {
                if self.media.start_screen_share().is_none() {
                    debug!("screen share already live or pending");
                }
            }
            RoomCommand::StopScreenShare => {
                if self.media.stop_screen_share() {
                    self.emit(RoomEvent::ScreenShareStopped);
                }
            }
            RoomCommand::SetAudio(enabled) => {
                self.media.set_audio_enabled(enabled);
                self.peers.set_enabled(TrackKind::Audio, enabled);
                self.send(ClientMessage::ToggleAudio { muted: !enabled }).await?;
            }
            RoomCommand::SetVideo(enabled) => {
                self.media.set_video_enabled(enabled);
                self.peers.set_enabled(TrackKind::Video, enabled);
            }
            RoomCommand::Typing(typing) => self.set_typing(typing).await?,
            RoomCommand::Chat(text) => {
                self.set_typing(false).await?;
                self.send(ClientMessage::Chat { text }).await?
            }
            RoomCommand::BrowserUrl(url) => self.send(ClientMessage::BrowserUpdate { url }).await?,
            RoomCommand::Leave => return Ok(false),
        }
        Ok(true)
    }

    async fn set_typing(&mut self, typing: bool) -> Result<()> {
        if self.typing == typing {
            return Ok(());
        }
        self.typing = typing;
        let msg = if typing {
            ClientMessage::TypingStart
        } else {
            ClientMessage::TypingStop
        };
        self.send(msg).await
    }

    /// Applies a device acquisition that finished in the background.
    pub async fn handle_acquired(&mut self, acquired: Acquired) -> Result<()> {
        match self.media.resolve(acquired) {
            Resolution::Stale => {}
            Resolution::Video(track) => {
                self.peers.replace_track(TrackKind::Video, Some(track)).await;
            }
            Resolution::ScreenShare(track) => {
                self.peers.replace_track(TrackKind::Video, Some(track)).await;
                self.send(ClientMessage::StartScreenShare).await?;
            }
            Resolution::Failed(e) => self.emit(RoomEvent::MediaFailed(e.to_string())),
            Resolution::VideoLost(e) => {
                self.peers.replace_track(TrackKind::Video, None).await;
                self.emit(RoomEvent::MediaFailed(e.to_string()));
            }
        }
        self.drain_peer_events();
        Ok(())
    }

    /// Processes relay messages, transport events, device results and user
    /// commands until the connection closes, the user leaves, or the host
    /// removes us. All links and local media are released on the way out.
    pub async fn run(mut self, mut commands: mpsc::Receiver<RoomCommand>) -> Result<()> {
        let mut stall_check = tokio::time::interval(STALL_CHECK_INTERVAL);
        loop {
            tokio::select! {
                msg = self.inbound.recv() => {
                    let Some(msg) = msg else {
                        info!("signaling connection closed");
                        break;
                    };
                    if !self.handle_server_message(msg).await? {
                        break;
                    }
                }
                Some(event) = self.transport_events.recv() => {
                    self.peers.on_transport_event(event).await?;
                    self.drain_peer_events();
                }
                Some(acquired) = self.acquisitions.recv() => {
                    self.handle_acquired(acquired).await?;
                }
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await? {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = stall_check.tick() => {
                    self.peers.expire_stalled(Instant::now());
                    self.drain_peer_events();
                }
            }
        }
        self.peers.close_all().await;
        self.drain_peer_events();
        Ok(())
    }
}
