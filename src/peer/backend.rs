//! Seam between the negotiation logic and the media engine.

use crate::error::NegotiationError;
use crate::media::LocalTrack;
use crate::peer::types::{IceCandidate, IceServerConfig, PeerState, SessionDescription, TrackKind};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Callback output of one peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    RemoteTrack(RemoteTrackInfo),
    StateChanged(PeerState),
}

type Deliver = Arc<dyn Fn(u64, PeerEvent) + Send + Sync>;

/// Forwards engine callbacks, tagged with the negotiation epoch that created
/// the connection so late callbacks from a replaced connection can be told apart.
#[derive(Clone)]
pub struct PeerEventSink {
    epoch: u64,
    deliver: Deliver,
}

impl PeerEventSink {
    pub fn new(epoch: u64, deliver: impl Fn(u64, PeerEvent) + Send + Sync + 'static) -> Self {
        Self {
            epoch,
            deliver: Arc::new(deliver),
        }
    }

    pub(crate) fn with_epoch(&self, epoch: u64) -> Self {
        Self {
            epoch,
            deliver: self.deliver.clone(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn send(&self, event: PeerEvent) {
        (self.deliver)(self.epoch, event);
    }
}

#[async_trait]
pub trait PeerBackend: Send + Sync {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), NegotiationError>;
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;
    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), NegotiationError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;
    /// Swaps the track on the sender whose current track is video, without
    /// renegotiating. `Ok(false)` when there is no such sender.
    async fn replace_video_track(&self, track: Arc<LocalTrack>) -> Result<bool, NegotiationError>;
    async fn sender_count(&self) -> usize;
    async fn close(&self) -> Result<(), NegotiationError>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerBackend>, NegotiationError>;
}
