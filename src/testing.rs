//! In-process fakes shared by the unit tests: a recording peer backend and a
//! two-party signaling relay speaking the server's event protocol.

use crate::error::{NegotiationError, PermissionError};
use crate::media::{LocalStream, LocalTrack, MediaConstraints, MediaSource, SyntheticMediaSource};
use crate::peer::{
    IceCandidate, IceServerConfig, PeerBackend, PeerEvent, PeerEventSink, PeerFactory, PeerState,
    RemoteTrackInfo, SdpKind, SessionDescription, TrackKind,
};
use crate::signaling::{Envelope, MemoryConnection, MemoryTransport, SignalingClient, SignalingTransport};
use crate::utils::now_millis;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub(crate) fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// A client whose sends all fail.
pub(crate) fn offline_signaling() -> Arc<SignalingClient> {
    Arc::new(SignalingClient::new(Arc::new(MemoryTransport::refusing())))
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BackendOp {
    AddTrack(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(IceCandidate),
    ReplaceVideo(String),
    Close,
}

/// User media that stays pending, like an unanswered permission prompt,
/// until [`GatedMediaSource::release`] is called.
pub(crate) struct GatedMediaSource {
    inner: SyntheticMediaSource,
    open: watch::Sender<bool>,
}

impl GatedMediaSource {
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            inner: SyntheticMediaSource::new(),
            open,
        }
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn user_requests(&self) -> usize {
        self.inner.user_requests()
    }
}

#[async_trait]
impl MediaSource for GatedMediaSource {
    async fn acquire_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalStream, PermissionError> {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        self.inner.acquire_user_media(constraints).await
    }

    async fn acquire_display_media(&self) -> Result<Arc<LocalTrack>, PermissionError> {
        self.inner.acquire_display_media().await
    }
}

/// Engine failures a fake backend injects.
#[derive(Debug, Default, Clone)]
pub(crate) struct Faults {
    pub offer: bool,
    pub add_track: bool,
    pub candidate: Option<IceCandidate>,
}

/// Records every call. Once both descriptions are applied it reports a
/// local candidate, a remote video track and `Connected`, as an engine would.
pub(crate) struct FakeBackend {
    id: usize,
    ops: Mutex<Vec<BackendOp>>,
    senders: Mutex<Vec<Arc<LocalTrack>>>,
    sink: PeerEventSink,
    faults: Faults,
}

impl FakeBackend {
    pub fn ops(&self) -> Vec<BackendOp> {
        self.ops.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendOp) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| pred(op)).count()
    }

    pub fn position(&self, pred: impl Fn(&BackendOp) -> bool) -> usize {
        self.ops
            .lock()
            .iter()
            .position(|op| pred(op))
            .expect("operation not recorded")
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                BackendOp::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn outgoing_video(&self) -> Option<String> {
        self.senders
            .lock()
            .iter()
            .find(|t| t.kind() == TrackKind::Video)
            .map(|t| t.id().to_owned())
    }

    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.senders.lock().clone()
    }

    /// Injects an engine callback.
    pub fn emit(&self, event: PeerEvent) {
        self.sink.send(event);
    }

    fn record(&self, op: BackendOp) {
        self.ops.lock().push(op);
    }

    fn maybe_connected(&self) {
        let (local, remote) = {
            let ops = self.ops.lock();
            (
                ops.iter().any(|op| matches!(op, BackendOp::SetLocal(_))),
                ops.iter().any(|op| matches!(op, BackendOp::SetRemote(_))),
            )
        };
        if local && remote {
            self.sink.send(PeerEvent::LocalCandidate(candidate(100 + self.id as u32)));
            self.sink.send(PeerEvent::RemoteTrack(RemoteTrackInfo {
                id: format!("remote-video-{}", self.id),
                stream_id: "remote".into(),
                kind: TrackKind::Video,
            }));
            self.sink.send(PeerEvent::StateChanged(PeerState::Connected));
        }
    }
}

#[async_trait]
impl PeerBackend for FakeBackend {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), NegotiationError> {
        self.record(BackendOp::AddTrack(track.id().to_owned()));
        if self.faults.add_track {
            return Err(NegotiationError::Backend("track refused".into()));
        }
        self.senders.lock().push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(BackendOp::CreateOffer);
        if self.faults.offer {
            return Err(NegotiationError::Backend("offer refused".into()));
        }
        Ok(SessionDescription::offer(format!("v=0 offer {}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(BackendOp::CreateAnswer);
        Ok(SessionDescription::answer(format!("v=0 answer {}", self.id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        self.record(BackendOp::SetLocal(desc.kind));
        self.maybe_connected();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(BackendOp::SetRemote(desc.kind));
        self.maybe_connected();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let refused = self.faults.candidate.as_ref() == Some(&candidate);
        self.record(BackendOp::AddCandidate(candidate));
        if refused {
            return Err(NegotiationError::Backend("candidate refused".into()));
        }
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<LocalTrack>) -> Result<bool, NegotiationError> {
        let mut senders = self.senders.lock();
        let Some(slot) = senders.iter_mut().find(|t| t.kind() == TrackKind::Video) else {
            return Ok(false);
        };
        *slot = track.clone();
        drop(senders);
        self.record(BackendOp::ReplaceVideo(track.id().to_owned()));
        Ok(true)
    }

    async fn sender_count(&self) -> usize {
        self.senders.lock().len()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.record(BackendOp::Close);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakePeerFactory {
    created: Mutex<Vec<Arc<FakeBackend>>>,
    faults: Faults,
}

impl FakePeerFactory {
    pub fn failing_offers() -> Self {
        Self::with_faults(Faults {
            offer: true,
            ..Faults::default()
        })
    }

    pub fn with_faults(faults: Faults) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    pub fn last(&self) -> Arc<FakeBackend> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no peer connection created")
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServerConfig],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerBackend>, NegotiationError> {
        let mut created = self.created.lock();
        let backend = Arc::new(FakeBackend {
            id: created.len() + 1,
            ops: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            sink: events,
            faults: self.faults.clone(),
        });
        created.push(backend.clone());
        Ok(backend)
    }
}

struct Peer {
    socket_id: String,
    to_client: Option<mpsc::UnboundedSender<Envelope>>,
    participant: Option<Value>,
    session: Option<String>,
}

/// The signaling server for tests: room membership plus relaying of call
/// events to the other member, tagged with the sender's socket id.
#[derive(Clone)]
pub(crate) struct Relay {
    transport: Arc<MemoryTransport>,
    frames: Arc<Mutex<Vec<Envelope>>>,
    wire: mpsc::UnboundedSender<Wire>,
}

enum Wire {
    Frame(usize, Envelope),
    Closed(usize),
    /// Server-originated frame for the member with this user id.
    Push(String, Envelope),
}

impl Relay {
    pub fn start() -> Self {
        let (transport, mut accept) = MemoryTransport::new();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let log = frames.clone();
        let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<Wire>();
        let wire = wire_tx.clone();
        tokio::spawn(async move {
            let mut peers: Vec<Peer> = Vec::new();
            loop {
                tokio::select! {
                    Some(conn) = accept.recv() => {
                        let index = peers.len();
                        peers.push(Peer {
                            socket_id: format!("sock-{}", index + 1),
                            to_client: Some(conn.to_client.clone()),
                            participant: None,
                            session: None,
                        });
                        forward(index, conn, wire_tx.clone());
                    }
                    Some(wire) = wire_rx.recv() => match wire {
                        Wire::Frame(index, envelope) => {
                            log.lock().push(envelope.clone());
                            on_frame(&mut peers, index, envelope);
                        }
                        Wire::Closed(index) => on_close(&mut peers, index),
                        Wire::Push(user_id, envelope) => {
                            let target = peers.iter().find(|p| {
                                p.participant.as_ref().is_some_and(|v| v["userId"] == user_id.as_str())
                            });
                            if let Some(peer) = target {
                                deliver(peer, &envelope.event, envelope.data);
                            }
                        }
                    },
                    else => break,
                }
            }
        });
        Self {
            transport: Arc::new(transport),
            frames,
            wire,
        }
    }

    pub fn transport(&self) -> Arc<dyn SignalingTransport> {
        self.transport.clone()
    }

    /// Sends `event` to the member registered as `user_id`, as if the server
    /// had relayed it.
    pub fn push_to(&self, user_id: &str, event: &str, data: Value) {
        let _ = self.wire.send(Wire::Push(user_id.to_owned(), Envelope::new(event, data)));
    }

    pub fn count(&self, event: &str) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.event == event)
            .count()
    }
}

fn forward(index: usize, conn: MemoryConnection, wire: mpsc::UnboundedSender<Wire>) {
    let mut from_client = conn.from_client;
    tokio::spawn(async move {
        while let Some(envelope) = from_client.recv().await {
            if wire.send(Wire::Frame(index, envelope)).is_err() {
                return;
            }
        }
        let _ = wire.send(Wire::Closed(index));
    });
}

fn deliver(peer: &Peer, event: &str, data: Value) {
    if let Some(tx) = &peer.to_client {
        let _ = tx.send(Envelope::new(event, data));
    }
}

fn others(peers: &[Peer], index: usize) -> impl Iterator<Item = &Peer> {
    let session = peers[index].session.clone();
    peers
        .iter()
        .enumerate()
        .filter(move |(i, p)| *i != index && p.to_client.is_some() && session.is_some() && p.session == session)
        .map(|(_, p)| p)
}

fn on_frame(peers: &mut [Peer], index: usize, envelope: Envelope) {
    let from = peers[index].socket_id.clone();
    let data = envelope.data;
    match envelope.event.as_str() {
        "register-user" => {}
        "join-session" => {
            let participant = json!({
                "socketId": from,
                "userId": data["userId"],
                "userName": data["userName"],
                "userRole": data["userRole"],
                "joinedAt": now_millis(),
            });
            peers[index].participant = Some(participant.clone());
            peers[index].session = data["sessionId"].as_str().map(str::to_owned);

            let members: Vec<Value> = peers
                .iter()
                .filter(|p| p.to_client.is_some() && p.session == peers[index].session)
                .filter_map(|p| p.participant.clone())
                .collect();
            deliver(&peers[index], "session-participants", json!({ "participants": members }));
            for other in others(peers, index) {
                deliver(other, "user-joined", json!({ "participant": participant }));
            }
            if members.len() == 2 {
                let ready = json!({ "message": "both participants present", "count": 2 });
                deliver(&peers[index], "session-ready", ready.clone());
                for other in others(peers, index) {
                    deliver(other, "session-ready", ready.clone());
                }
            }
        }
        event => {
            let (name, payload) = match event {
                "start-video-call" => ("incoming-call", json!({ "from": from, "sessionId": data["sessionId"] })),
                "accept-call" => ("call-accepted", json!({ "from": from })),
                "reject-call" => ("call-rejected", json!({ "from": from })),
                "end-call" => ("call-ended", json!({ "from": from })),
                "webrtc-offer" => ("webrtc-offer", json!({ "offer": data["offer"], "from": from })),
                "webrtc-answer" => ("webrtc-answer", json!({ "answer": data["answer"], "from": from })),
                "webrtc-ice-candidate" => (
                    "webrtc-ice-candidate",
                    json!({ "candidate": data["candidate"], "from": from }),
                ),
                "toggle-audio" => ("toggle-audio", json!({ "enabled": data["enabled"], "from": from })),
                "toggle-video" => ("toggle-video", json!({ "enabled": data["enabled"], "from": from })),
                "send-message" => (
                    "new-message",
                    json!({
                        "sessionId": data["sessionId"],
                        "message": data["message"],
                        "userName": data["userName"],
                        "timestamp": now_millis(),
                        "from": from,
                    }),
                ),
                _ => return,
            };
            for other in others(peers, index) {
                deliver(other, name, payload.clone());
            }
        }
    }
}

fn on_close(peers: &mut [Peer], index: usize) {
    if let Some(participant) = peers[index].participant.clone() {
        let left = json!({
            "socketId": participant["socketId"],
            "userId": participant["userId"],
            "userName": participant["userName"],
        });
        for other in others(peers, index) {
            deliver(other, "user-left", left.clone());
        }
    }
    peers[index].to_client = None;
}
