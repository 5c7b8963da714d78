//! Local media: captured tracks, their sources, and the toggle/screen-share facade.

pub mod control;
pub mod track;

pub use control::{MediaControl, MediaState, ScreenShareOutcome, ScreenSharePhase, ScreenShareState};
pub use track::{
    LocalStream, LocalTrack, MediaConstraints, MediaSource, SyntheticMediaSource, TrackSource,
};
