use crate::error::PermissionError;
use crate::peer::types::TrackKind;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

/// A locally captured track: the RTP sample writer plus the `enabled`,
/// stopped and ended flags a browser MediaStreamTrack carries.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    rtp: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
    ended: watch::Sender<bool>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl LocalTrack {
    pub fn new(source: TrackSource, stream_id: &str) -> Self {
        let (kind, mime) = match source {
            TrackSource::Microphone => (TrackKind::Audio, MIME_TYPE_OPUS),
            TrackSource::Camera | TrackSource::Screen => (TrackKind::Video, MIME_TYPE_VP8),
        };
        let id = format!("{:?}-{}", source, random_id()).to_lowercase();
        let codec = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: mime.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: mime.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let rtp = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_owned(),
        ));
        let (ended, _) = watch::channel(false);
        Self {
            id,
            kind,
            source,
            rtp,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            ended,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// Handle for attaching this track to a peer connection sender.
    pub fn rtp_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.rtp.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Releases the capture. Returns `true` only for the call that released it.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("local track {} stopped", self.id);
        self.ended.send_replace(true);
        true
    }

    /// Ends the track from the capture side, as the OS "stop sharing"
    /// control does. Resources are released by whoever calls [`stop`].
    ///
    /// [`stop`]: LocalTrack::stop
    pub fn end_from_source(&self) {
        self.ended.send_replace(true);
    }

    /// Resolves once the track has ended or been stopped.
    pub async fn ended(&self) {
        let mut rx = self.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Feeds one encoded frame. Frames written while disabled or stopped are dropped.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> Result<(), webrtc::Error> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(());
        }
        self.rtp
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
    }
}

/// Camera + microphone captured by one user-media request.
#[derive(Debug, Clone)]
pub struct LocalStream {
    pub id: String,
    pub audio: Option<Arc<LocalTrack>>,
    pub video: Option<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.audio.iter().chain(self.video.iter())
    }

    pub fn stop(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Where local media comes from. Both requests may wait indefinitely on a
/// permission decision.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalStream, PermissionError>;

    async fn acquire_display_media(&self) -> Result<Arc<LocalTrack>, PermissionError>;
}

/// Sample-fed tracks; the host application writes encoded frames into them.
#[derive(Debug, Default)]
pub struct SyntheticMediaSource {
    deny_user_media: bool,
    deny_display: bool,
    user_requests: AtomicUsize,
}

impl SyntheticMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying_user_media() -> Self {
        Self {
            deny_user_media: true,
            ..Self::default()
        }
    }

    pub fn denying_display() -> Self {
        Self {
            deny_display: true,
            ..Self::default()
        }
    }

    pub fn user_requests(&self) -> usize {
        self.user_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalStream, PermissionError> {
        self.user_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_user_media {
            return Err(PermissionError::UserMediaDenied("NotAllowedError".into()));
        }
        let id = format!("local-{}", random_id());
        Ok(LocalStream {
            audio: constraints
                .audio
                .then(|| Arc::new(LocalTrack::new(TrackSource::Microphone, &id))),
            video: constraints
                .video
                .then(|| Arc::new(LocalTrack::new(TrackSource::Camera, &id))),
            id,
        })
    }

    async fn acquire_display_media(&self) -> Result<Arc<LocalTrack>, PermissionError> {
        if self.deny_display {
            return Err(PermissionError::DisplayCaptureDenied(
                "NotAllowedError".into(),
            ));
        }
        let id = format!("screen-{}", random_id());
        Ok(Arc::new(LocalTrack::new(TrackSource::Screen, &id)))
    }
}
