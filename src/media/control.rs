use crate::error::PermissionError;
use crate::media::LocalTrack;
use crate::peer::PeerConnectionManager;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Screen-share lifecycle. `Pending` covers the display-capture prompt and
/// the sender swap; the UI only sees `Active` once the swap has resolved.
#[derive(Debug, Clone, Default)]
pub enum ScreenShareState {
    #[default]
    Inactive,
    Pending { generation: u64 },
    Active { track: Arc<LocalTrack> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenSharePhase {
    Inactive,
    Pending,
    Active,
}

/// Read-only view of the media flags for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_share: ScreenSharePhase,
    pub has_local_stream: bool,
    pub has_remote_stream: bool,
    pub remote_audio_enabled: bool,
    pub remote_video_enabled: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            screen_share: ScreenSharePhase::Inactive,
            has_local_stream: false,
            has_remote_stream: false,
            remote_audio_enabled: true,
            remote_video_enabled: true,
        }
    }
}

/// Result of a finished display-capture request.
#[derive(Debug)]
pub enum ScreenShareOutcome {
    /// The screen track is now the outgoing video track.
    Started(Arc<LocalTrack>),
    /// The request was superseded or cancelled; the capture was released.
    Stale,
    Denied(PermissionError),
    /// The swap could not happen; the capture was released.
    Failed(String),
}

/// Local audio/video toggles and the screen-share swap. Tracks themselves
/// belong to the [`PeerConnectionManager`]; this only flips their flags and
/// asks the manager to swap the outgoing video track.
#[derive(Debug)]
pub struct MediaControl {
    audio_enabled: bool,
    video_enabled: bool,
    screen: ScreenShareState,
    generation: u64,
    remote_audio_enabled: bool,
    remote_video_enabled: bool,
}

impl Default for MediaControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaControl {
    pub fn new() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            screen: ScreenShareState::Inactive,
            generation: 0,
            remote_audio_enabled: true,
            remote_video_enabled: true,
        }
    }

    pub fn screen_share(&self) -> &ScreenShareState {
        &self.screen
    }

    pub fn state(&self, peers: &PeerConnectionManager) -> MediaState {
        MediaState {
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
            screen_share: match self.screen {
                ScreenShareState::Inactive => ScreenSharePhase::Inactive,
                ScreenShareState::Pending { .. } => ScreenSharePhase::Pending,
                ScreenShareState::Active { .. } => ScreenSharePhase::Active,
            },
            has_local_stream: peers.local_stream().is_some(),
            has_remote_stream: !peers.remote_tracks().is_empty(),
            remote_audio_enabled: self.remote_audio_enabled,
            remote_video_enabled: self.remote_video_enabled,
        }
    }

    /// Flips the microphone track. `None` when there is no microphone.
    pub fn toggle_audio(&mut self, peers: &PeerConnectionManager) -> Option<bool> {
        let track = peers.microphone_track()?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        self.audio_enabled = enabled;
        debug!("microphone {}", if enabled { "on" } else { "muted" });
        Some(enabled)
    }

    /// Flips the camera track. `None` when there is no camera.
    pub fn toggle_video(&mut self, peers: &PeerConnectionManager) -> Option<bool> {
        let track = peers.camera_track()?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        self.video_enabled = enabled;
        debug!("camera {}", if enabled { "on" } else { "off" });
        Some(enabled)
    }

    pub fn set_remote_audio(&mut self, enabled: bool) {
        self.remote_audio_enabled = enabled;
    }

    pub fn set_remote_video(&mut self, enabled: bool) {
        self.remote_video_enabled = enabled;
    }

    /// Marks a display-capture request in flight and returns its generation,
    /// or `None` if a share is already pending or active.
    pub fn begin_screen_share(&mut self) -> Option<u64> {
        if !matches!(self.screen, ScreenShareState::Inactive) {
            return None;
        }
        self.generation += 1;
        self.screen = ScreenShareState::Pending {
            generation: self.generation,
        };
        Some(self.generation)
    }

    /// Applies the outcome of the capture request started as `generation`.
    pub async fn complete_screen_share(
        &mut self,
        generation: u64,
        captured: Result<Arc<LocalTrack>, PermissionError>,
        peers: &PeerConnectionManager,
    ) -> ScreenShareOutcome {
        let current = matches!(
            self.screen,
            ScreenShareState::Pending { generation: g } if g == generation
        );
        let track = match captured {
            Ok(track) if !current => {
                debug!("discarding stale screen capture {}", track.id());
                track.stop();
                return ScreenShareOutcome::Stale;
            }
            Err(_) if !current => return ScreenShareOutcome::Stale,
            Err(e) => {
                self.screen = ScreenShareState::Inactive;
                return ScreenShareOutcome::Denied(e);
            }
            Ok(track) => track,
        };

        match peers.replace_outgoing_video_track(track.clone()).await {
            Ok(true) => {
                info!("screen share started ({})", track.id());
                self.screen = ScreenShareState::Active {
                    track: track.clone(),
                };
                ScreenShareOutcome::Started(track)
            }
            Ok(false) => {
                track.stop();
                self.screen = ScreenShareState::Inactive;
                ScreenShareOutcome::Failed("no outgoing video sender".into())
            }
            Err(e) => {
                track.stop();
                self.screen = ScreenShareState::Inactive;
                ScreenShareOutcome::Failed(e.to_string())
            }
        }
    }

    /// Puts the camera back on the video sender and releases the screen
    /// capture. Returns `false` if nothing was shared.
    pub async fn stop_screen_share(&mut self, peers: &PeerConnectionManager) -> bool {
        match std::mem::take(&mut self.screen) {
            ScreenShareState::Inactive => false,
            ScreenShareState::Pending { .. } => {
                // the capture, if it ever arrives, will be stale
                self.generation += 1;
                true
            }
            ScreenShareState::Active { track } => {
                self.revert_to_camera(peers).await;
                track.stop();
                info!("screen share stopped");
                true
            }
        }
    }

    /// The capture side ended `track_id` (OS or browser "stop sharing").
    pub async fn on_screen_track_ended(&mut self, track_id: &str, peers: &PeerConnectionManager) -> bool {
        match &self.screen {
            ScreenShareState::Active { track } if track.id() == track_id => {
                self.stop_screen_share(peers).await
            }
            _ => {
                debug!("ignoring end of inactive screen track {track_id}");
                false
            }
        }
    }

    async fn revert_to_camera(&self, peers: &PeerConnectionManager) {
        let Some(camera) = peers.camera_track() else {
            debug!("no camera track to revert to");
            return;
        };
        if !peers.has_connection() {
            return;
        }
        match peers.replace_outgoing_video_track(camera).await {
            Ok(true) => debug!("camera restored as outgoing video"),
            Ok(false) => warn!("no video sender to restore the camera on"),
            Err(e) => warn!("failed to restore camera track: {e}"),
        }
    }

    /// Releases the screen capture without touching the senders. Used on teardown.
    pub fn release(&mut self) {
        if let ScreenShareState::Active { track } = std::mem::take(&mut self.screen) {
            track.stop();
        }
        self.generation += 1;
    }
}
