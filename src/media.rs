use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// One captured audio or video component owned by this participant.
pub trait LocalTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// Releases the underlying capture. Calling it again has no effect.
    fn stop(&self);
    fn is_stopped(&self) -> bool;
    fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync>;
}

/// A track whose samples are pushed in by a capture collaborator. Samples are
/// dropped while the track is disabled or after it was stopped.
pub struct CapturedTrack {
    id: String,
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl CapturedTrack {
    pub fn new(kind: TrackKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let id = id.into();
        let mime_type = match kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            stream_id.into(),
        ));
        Self {
            id,
            kind,
            track,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(());
        }
        self.track.write_sample(sample).await?;
        Ok(())
    }
}

impl fmt::Debug for CapturedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl LocalTrack for CapturedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(track = %self.id, kind = %self.kind, "track stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>
    }
}

/// The participant's outgoing media: independently swappable audio and
/// video components.
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    pub audio: Option<Arc<dyn LocalTrack>>,
    pub video: Option<Arc<dyn LocalTrack>>,
}

impl LocalMedia {
    pub fn track(&self, kind: TrackKind) -> Option<&Arc<dyn LocalTrack>> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    pub fn slot(&mut self, kind: TrackKind) -> &mut Option<Arc<dyn LocalTrack>> {
        match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        }
    }

    pub fn stop_all(&mut self) {
        for track in [self.audio.take(), self.video.take()].into_iter().flatten() {
            track.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    #[default]
    User,
    Environment,
}

impl Facing {
    pub fn flipped(self) -> Self {
        match self {
            Facing::User => Facing::Environment,
            Facing::Environment => Facing::User,
        }
    }
}

/// Device capture collaborator. Each call may take arbitrarily long.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open_microphone(&self) -> Result<Arc<dyn LocalTrack>>;
    async fn open_camera(&self, facing: Facing) -> Result<Arc<dyn LocalTrack>>;
    async fn open_display(&self) -> Result<Arc<dyn LocalTrack>>;
}

/// Hands out fresh [`CapturedTrack`]s with nothing feeding them. Lets a
/// headless participant negotiate media sections without real devices.
#[derive(Debug, Default)]
pub struct PlaceholderSource {
    counter: AtomicU64,
}

impl PlaceholderSource {
    fn next(&self, kind: TrackKind, label: &str) -> Arc<dyn LocalTrack> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(CapturedTrack::new(kind, format!("{label}-{n}"), "local"))
    }
}

#[async_trait]
impl MediaSource for PlaceholderSource {
    async fn open_microphone(&self) -> Result<Arc<dyn LocalTrack>> {
        Ok(self.next(TrackKind::Audio, "mic"))
    }

    async fn open_camera(&self, facing: Facing) -> Result<Arc<dyn LocalTrack>> {
        let label = match facing {
            Facing::User => "camera-user",
            Facing::Environment => "camera-env",
        };
        Ok(self.next(TrackKind::Video, label))
    }

    async fn open_display(&self) -> Result<Arc<dyn LocalTrack>> {
        Ok(self.next(TrackKind::Video, "display"))
    }
}

/// Monotonic counter of the user's latest media intent. An async device
/// operation captures the value when it starts and may only apply its result
/// if the value is still current when it resolves.
#[derive(Debug, Clone, Default)]
pub struct IntentGeneration(Arc<AtomicU64>);

impl IntentGeneration {
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionPurpose {
    Camera,
    ScreenShare,
    RestoreCamera,
}

/// Result of a device acquisition, delivered back to the client loop.
#[derive(Debug)]
pub struct Acquired {
    pub generation: u64,
    pub purpose: AcquisitionPurpose,
    pub result: Result<Arc<dyn LocalTrack>>,
}

/// What the client should do after an acquisition resolved.
#[derive(Debug)]
pub enum Resolution {
    /// A newer intent superseded this one; the track was released.
    Stale,
    /// The track should replace the outgoing video.
    Video(Arc<dyn LocalTrack>),
    /// The display track should replace the outgoing video and be announced.
    ScreenShare(Arc<dyn LocalTrack>),
    Failed(Error),
    /// The camera could not be restored after a screen share; the outgoing
    /// video must be cleared so the display is no longer sent.
    VideoLost(Error),
}

/// Tracks the user's camera and screen-share intent and runs device
/// acquisitions off the event loop.
pub struct MediaController {
    source: Arc<dyn MediaSource>,
    intent: IntentGeneration,
    facing: Facing,
    video_enabled: bool,
    audio_enabled: bool,
    sharing: bool,
    /// Generation of the display acquisition in flight, if any.
    share_pending: Option<u64>,
    /// The display track still occupies the video slot and a camera must
    /// replace it.
    restore_pending: bool,
    last_begun: u64,
    results: mpsc::UnboundedSender<Acquired>,
}

impl MediaController {
    pub fn new(source: Arc<dyn MediaSource>) -> (Self, mpsc::UnboundedReceiver<Acquired>) {
        let (results, rx) = mpsc::unbounded_channel();
        (
            Self {
                source,
                intent: IntentGeneration::default(),
                facing: Facing::default(),
                video_enabled: true,
                audio_enabled: true,
                sharing: false,
                share_pending: None,
                restore_pending: false,
                last_begun: 0,
                results,
            },
            rx,
        )
    }

    pub fn source(&self) -> &Arc<dyn MediaSource> {
        &self.source
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn is_sharing(&self) -> bool {
        self.sharing
    }

    pub fn is_share_pending(&self) -> bool {
        self.share_pending
            .is_some_and(|generation| self.intent.is_current(generation))
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn generation(&self) -> u64 {
        self.intent.current()
    }

    pub fn flip_camera(&mut self) -> u64 {
        self.facing = self.facing.flipped();
        self.begin(AcquisitionPurpose::Camera)
    }

    /// Starts acquiring the display. Returns `None` if a share is already
    /// live or being acquired.
    pub fn start_screen_share(&mut self) -> Option<u64> {
        if self.sharing || self.is_share_pending() {
            return None;
        }
        let generation = self.begin(AcquisitionPurpose::ScreenShare);
        self.share_pending = Some(generation);
        Some(generation)
    }

    /// Ends a live share (restoring the camera) or cancels one still being
    /// acquired. Returns false if there was neither.
    pub fn stop_screen_share(&mut self) -> bool {
        if self.sharing {
            self.sharing = false;
            self.restore_pending = true;
            self.begin(AcquisitionPurpose::RestoreCamera);
            return true;
        }
        if self.is_share_pending() {
            self.share_pending = None;
            self.intent.advance();
            debug!("pending screen share cancelled");
            return true;
        }
        false
    }

    /// Records the video toggle and invalidates any acquisition in flight.
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
        self.intent.advance();
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }

    fn begin(&mut self, purpose: AcquisitionPurpose) -> u64 {
        let generation = self.intent.advance();
        self.last_begun = generation;
        let source = Arc::clone(&self.source);
        let results = self.results.clone();
        let facing = self.facing;
        tokio::spawn(async move {
            let result = match purpose {
                AcquisitionPurpose::Camera | AcquisitionPurpose::RestoreCamera => {
                    source.open_camera(facing).await
                }
                AcquisitionPurpose::ScreenShare => source.open_display().await,
            };
            let _ = results.send(Acquired {
                generation,
                purpose,
                result,
            });
        });
        generation
    }

    pub fn resolve(&mut self, acquired: Acquired) -> Resolution {
        if !self.intent.is_current(acquired.generation) {
            if let Ok(track) = &acquired.result {
                track.stop();
            }
            debug!(generation = acquired.generation, purpose = ?acquired.purpose, "discarding stale acquisition");
            // Nothing current is in flight, but the display still needs replacing.
            if self.restore_pending && !self.intent.is_current(self.last_begun) {
                debug!("re-issuing camera restore");
                self.begin(AcquisitionPurpose::RestoreCamera);
            }
            return Resolution::Stale;
        }

        let track = match acquired.result {
            Ok(track) => track,
            Err(e) => {
                warn!(purpose = ?acquired.purpose, error = %e, "device acquisition failed");
                return match acquired.purpose {
                    AcquisitionPurpose::Camera => {
                        self.facing = self.facing.flipped();
                        Resolution::Failed(e)
                    }
                    AcquisitionPurpose::ScreenShare => {
                        self.share_pending = None;
                        Resolution::Failed(e)
                    }
                    AcquisitionPurpose::RestoreCamera => {
                        self.restore_pending = false;
                        Resolution::VideoLost(e)
                    }
                };
            }
        };

        match acquired.purpose {
            AcquisitionPurpose::Camera | AcquisitionPurpose::RestoreCamera => {
                self.restore_pending = false;
                track.set_enabled(self.video_enabled);
                Resolution::Video(track)
            }
            AcquisitionPurpose::ScreenShare => {
                self.sharing = true;
                self.share_pending = None;
                self.restore_pending = false;
                Resolution::ScreenShare(track)
            }
        }
    }
}
