use crate::error::NegotiationError;
use crate::logger::dump_candidate;
use crate::media::{LocalStream, LocalTrack};
use crate::peer::backend::{PeerBackend, PeerEventSink, PeerFactory, RemoteTrackInfo};
use crate::peer::ice::{analyze_candidates, CandidateQueue, CandidateSummary};
use crate::peer::state::{NegotiationRecord, NegotiationRole};
use crate::peer::types::{IceCandidate, IceServerConfig, PeerState, SessionDescription};
use crate::signaling::{ClientMessage, SignalingClient};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns local media, the single peer connection of the session and its
/// negotiation record.
pub struct PeerConnectionManager {
    session_id: String,
    factory: Arc<dyn PeerFactory>,
    ice_servers: Vec<IceServerConfig>,
    signaling: Arc<SignalingClient>,
    sink: PeerEventSink,
    epoch: u64,
    backend: Option<Arc<dyn PeerBackend>>,
    record: Option<NegotiationRecord>,
    /// Remote candidates that arrived before any connection existed.
    early: CandidateQueue,
    local_stream: Option<LocalStream>,
    remote_tracks: Vec<RemoteTrackInfo>,
    peer_state: PeerState,
    closed: bool,
}

impl PeerConnectionManager {
    pub fn new(
        session_id: impl Into<String>,
        factory: Arc<dyn PeerFactory>,
        ice_servers: Vec<IceServerConfig>,
        signaling: Arc<SignalingClient>,
        sink: PeerEventSink,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            factory,
            ice_servers,
            signaling,
            epoch: sink.epoch(),
            sink,
            backend: None,
            record: None,
            early: CandidateQueue::default(),
            local_stream: None,
            remote_tracks: Vec::new(),
            peer_state: PeerState::New,
            closed: false,
        }
    }

    pub fn set_local_stream(&mut self, stream: LocalStream) {
        if self.closed {
            stream.stop();
            return;
        }
        if let Some(old) = self.local_stream.replace(stream) {
            warn!("replacing local stream {}; stopping its tracks", old.id);
            old.stop();
        }
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    pub fn camera_track(&self) -> Option<Arc<LocalTrack>> {
        self.local_stream.as_ref().and_then(|s| s.video.clone())
    }

    pub fn microphone_track(&self) -> Option<Arc<LocalTrack>> {
        self.local_stream.as_ref().and_then(|s| s.audio.clone())
    }

    pub fn remote_tracks(&self) -> &[RemoteTrackInfo] {
        &self.remote_tracks
    }

    pub fn has_connection(&self) -> bool {
        self.backend.is_some()
    }

    pub fn record(&self) -> Option<&NegotiationRecord> {
        self.record.as_ref()
    }

    pub fn peer_state(&self) -> PeerState {
        self.peer_state
    }

    /// True when `epoch` belongs to the live connection.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.backend.is_some() && epoch == self.epoch
    }

    /// Builds the peer connection for a new call attempt and attaches the
    /// local tracks acquired so far. Any previous connection is dropped.
    pub async fn create_connection(&mut self, role: NegotiationRole) -> Result<u64, NegotiationError> {
        if self.closed {
            return Err(NegotiationError::NotInProgress);
        }
        self.reset().await;

        self.epoch += 1;
        let epoch = self.epoch;
        let backend = self
            .factory
            .create(&self.ice_servers, self.sink.with_epoch(epoch))
            .await?;

        match &self.local_stream {
            Some(stream) => {
                for track in stream.tracks() {
                    if let Err(e) = backend.add_track(track.clone()).await {
                        if let Err(close_err) = backend.close().await {
                            warn!("error closing half-built peer connection: {close_err}");
                        }
                        return Err(e);
                    }
                }
            }
            None => warn!("creating peer connection without local media"),
        }

        let mut record = NegotiationRecord::new(epoch, role);
        if !self.early.is_empty() {
            debug!("adopting {} early remote candidates", self.early.len());
            record.pending.append(&mut self.early);
        }
        self.record = Some(record);
        self.backend = Some(backend);
        self.peer_state = PeerState::New;
        info!("peer connection created (epoch {epoch}, {:?})", role);
        Ok(epoch)
    }

    fn parts(&mut self) -> Result<(Arc<dyn PeerBackend>, &mut NegotiationRecord), NegotiationError> {
        match (&self.backend, self.record.as_mut()) {
            (Some(backend), Some(record)) => Ok((backend.clone(), record)),
            _ => Err(NegotiationError::NotInProgress),
        }
    }

    pub async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        let (backend, record) = self.parts()?;
        if record.role != NegotiationRole::Offerer {
            return Err(NegotiationError::WrongRole("offer", record.role));
        }
        let offer = backend.create_offer().await?;
        backend.set_local_description(offer.clone()).await?;
        record.local = Some(offer.clone());

        self.signaling.send(&ClientMessage::WebrtcOffer {
            session_id: self.session_id.clone(),
            offer: offer.clone(),
        });
        debug!("local offer applied and sent");
        Ok(offer)
    }

    pub async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
        let (backend, record) = self.parts()?;
        if record.role != NegotiationRole::Answerer {
            return Err(NegotiationError::WrongRole("answer", record.role));
        }
        if !record.has_remote() {
            return Err(NegotiationError::NotInProgress);
        }
        let answer = backend.create_answer().await?;
        backend.set_local_description(answer.clone()).await?;
        record.local = Some(answer.clone());

        self.signaling.send(&ClientMessage::WebrtcAnswer {
            session_id: self.session_id.clone(),
            answer: answer.clone(),
        });
        debug!("local answer applied and sent");
        Ok(answer)
    }

    /// Applies the remote description once per negotiation record, then
    /// flushes buffered candidates in receipt order. Returns how many were flushed.
    pub async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<usize, NegotiationError> {
        let (backend, record) = self.parts()?;
        if record.has_remote() {
            return Err(NegotiationError::RemoteAlreadySet);
        }
        backend.set_remote_description(desc.clone()).await?;
        record.remote = Some(desc);

        let buffered = record.pending.drain();
        let flushed = buffered.len();
        for candidate in buffered {
            match backend.add_ice_candidate(candidate.clone()).await {
                Ok(()) => record.applied.push(candidate),
                Err(e) => warn!("engine refused buffered candidate: {e}"),
            }
        }
        debug!("remote description applied, flushed {flushed} buffered candidates");
        Ok(flushed)
    }

    /// Applies the candidate now if the remote description is set, otherwise
    /// buffers it. Returns `true` when applied immediately.
    pub async fn add_remote_ice_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<bool, NegotiationError> {
        dump_candidate("REMOTE", &candidate);
        if self.backend.is_none() || self.record.is_none() {
            debug!("no peer connection yet, queuing remote candidate");
            self.early.push(candidate);
            return Ok(false);
        }
        let (backend, record) = self.parts()?;
        if !record.has_remote() {
            debug!("remote description not set yet, queuing remote candidate");
            record.pending.push(candidate);
            return Ok(false);
        }
        backend.add_ice_candidate(candidate.clone()).await?;
        record.applied.push(candidate);
        Ok(true)
    }

    /// Sends a gathered local candidate to the other participant.
    pub fn forward_local_candidate(&mut self, candidate: IceCandidate) {
        dump_candidate("LOCAL", &candidate);
        if let Some(record) = self.record.as_mut() {
            record.gathered.push(candidate.clone());
        }
        self.signaling.send(&ClientMessage::WebrtcIceCandidate {
            session_id: self.session_id.clone(),
            candidate,
        });
    }

    pub fn gathering_complete(&self) -> CandidateSummary {
        let gathered = self
            .record
            .as_ref()
            .map(|r| r.gathered.as_slice())
            .unwrap_or_default();
        analyze_candidates(gathered)
    }

    pub fn note_remote_track(&mut self, info: RemoteTrackInfo) {
        if !self.remote_tracks.iter().any(|t| t.id == info.id) {
            self.remote_tracks.push(info);
        }
    }

    pub fn note_state(&mut self, state: PeerState) {
        self.peer_state = state;
    }

    /// Puts `track` on the outgoing video sender in place. `Ok(false)` when
    /// the connection has no video sender.
    pub async fn replace_outgoing_video_track(
        &self,
        track: Arc<LocalTrack>,
    ) -> Result<bool, NegotiationError> {
        let backend = self.backend.as_ref().ok_or(NegotiationError::NotInProgress)?;
        backend.replace_video_track(track).await
    }

    pub async fn sender_count(&self) -> usize {
        match &self.backend {
            Some(backend) => backend.sender_count().await,
            None => 0,
        }
    }

    /// Drops the connection and negotiation record but keeps local media.
    pub async fn reset(&mut self) {
        self.record = None;
        self.remote_tracks.clear();
        if let Some(backend) = self.backend.take() {
            // late callbacks from the old connection become stale
            self.epoch += 1;
            if let Err(e) = backend.close().await {
                warn!("error closing peer connection: {e}");
            }
        }
    }

    /// Stops every local track and tears the connection down. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reset().await;
        self.early.drain();
        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }
        info!("peer connection manager closed");
    }
}
