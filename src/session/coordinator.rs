//! The call session actor.
//!
//! One task owns every piece of per-session state and applies inputs one at a
//! time. Work that can suspend indefinitely (permission prompts, timers) runs
//! in spawned tasks whose results come back as inputs tagged with the
//! generation they were started under, and are re-validated before use.

use crate::config::CallConfig;
use crate::error::{CallError, ChannelError, ConnectivityError, NegotiationError, PermissionError};
use crate::lookup::{SessionInfo, SessionLookup};
use crate::media::{
    LocalStream, LocalTrack, MediaConstraints, MediaControl, MediaSource, MediaState,
    ScreenShareOutcome,
};
use crate::peer::{
    NegotiationRole, PeerConnectionManager, PeerEvent, PeerEventSink, PeerFactory, PeerState,
    RemoteTrackInfo, SessionDescription,
};
use crate::session::chat::{ChatChannel, ChatMessage};
use crate::session::registry::{Participant, ParticipantRegistry, Role};
use crate::session::state::{CallState, CallTrigger, EndReason};
use crate::signaling::protocol::SERVER_EVENTS;
use crate::signaling::{
    ClientMessage, Envelope, ServerEvent, SignalingClient, Subscription, CONNECT_EVENT,
    DISCONNECT_EVENT,
};
use crate::utils::now_millis;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Local user actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartCall,
    AcceptCall,
    RejectCall,
    CancelCall,
    EndCall,
    ToggleAudio,
    ToggleVideo,
    StartScreenShare,
    StopScreenShare,
    SendMessage(String),
    Teardown,
}

/// Everything the actor reacts to.
#[derive(Debug)]
pub(crate) enum Input {
    Command(Command),
    Signal(Envelope),
    Peer {
        epoch: u64,
        event: PeerEvent,
    },
    MediaReady(Result<LocalStream, PermissionError>),
    ScreenCaptured {
        generation: u64,
        result: Result<Arc<LocalTrack>, PermissionError>,
    },
    ScreenTrackEnded {
        track_id: String,
    },
    GraceExpired {
        epoch: u64,
    },
    CallTimeout {
        attempt: u64,
    },
    Lookup(Result<SessionInfo, String>),
}

impl Input {
    /// Releases capture resources carried by an input that will never be applied.
    pub(crate) fn release(self) {
        match self {
            Input::MediaReady(Ok(stream)) => stream.stop(),
            Input::ScreenCaptured {
                result: Ok(track), ..
            } => {
                track.stop();
            }
            _ => {}
        }
    }
}

/// The joined session. Exists from join acknowledgment until teardown.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: i64,
    pub roster: ParticipantRegistry,
}

/// What observers render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub session_id: String,
    pub role: Role,
    pub state: CallState,
    pub connected: bool,
    pub joined: bool,
    pub participants: Vec<Participant>,
    pub media: MediaState,
    pub peer_state: PeerState,
    pub messages: Vec<ChatMessage>,
    pub session_info: Option<SessionInfo>,
    pub end_reason: Option<EndReason>,
}

impl CallSnapshot {
    pub(crate) fn initial(config: &CallConfig) -> Self {
        Self {
            session_id: config.session_id.clone(),
            role: config.role,
            state: CallState::Connecting,
            connected: false,
            joined: false,
            participants: Vec::new(),
            media: MediaState::default(),
            peer_state: PeerState::New,
            messages: Vec::new(),
            session_info: None,
            end_reason: None,
        }
    }
}

/// One-shot notifications for the UI.
#[derive(Debug, Clone)]
pub enum UiEvent {
    StateChanged { from: CallState, to: CallState },
    Error(CallError),
    ChannelLost,
    ConnectionProblem,
    ConnectionRecovered,
    CallTimedOut,
    RemoteTrack(RemoteTrackInfo),
    ChatMessage(ChatMessage),
    ScreenShareStarted,
    ScreenShareStopped,
    LookupFailed(String),
    Ended(EndReason),
}

pub(crate) struct Channels {
    pub inputs: mpsc::UnboundedSender<Input>,
    pub snapshot: watch::Sender<CallSnapshot>,
    pub events: broadcast::Sender<UiEvent>,
}

pub(crate) struct Collaborators {
    pub signaling: Arc<SignalingClient>,
    pub peers: Arc<dyn PeerFactory>,
    pub media: Arc<dyn MediaSource>,
    pub lookup: Option<Arc<dyn SessionLookup>>,
}

pub struct CallCoordinator {
    config: CallConfig,
    state: CallState,
    session: Option<Session>,
    connected: bool,
    signaling: Arc<SignalingClient>,
    peers: PeerConnectionManager,
    media_source: Arc<dyn MediaSource>,
    media: MediaControl,
    media_pending: bool,
    negotiation_deferred: bool,
    lookup: Option<Arc<dyn SessionLookup>>,
    session_info: Option<SessionInfo>,
    chat: ChatChannel,
    pending_offer: Option<SessionDescription>,
    subscriptions: Vec<Subscription>,
    grace_timer: Option<JoinHandle<()>>,
    grace_epoch: u64,
    call_timer: Option<JoinHandle<()>>,
    call_attempt: u64,
    end_reason: Option<EndReason>,
    inputs: mpsc::UnboundedSender<Input>,
    snapshot: watch::Sender<CallSnapshot>,
    events: broadcast::Sender<UiEvent>,
}

impl CallCoordinator {
    pub(crate) fn new(config: CallConfig, deps: Collaborators, channels: Channels) -> Self {
        let deliver = channels.inputs.clone();
        let sink = PeerEventSink::new(0, move |epoch, event| {
            let _ = deliver.send(Input::Peer { epoch, event });
        });
        let peers = PeerConnectionManager::new(
            config.session_id.clone(),
            deps.peers,
            config.ice_servers.clone(),
            deps.signaling.clone(),
            sink,
        );
        Self {
            chat: ChatChannel::new(config.session_id.clone()),
            config,
            state: CallState::Connecting,
            session: None,
            connected: false,
            signaling: deps.signaling,
            peers,
            media_source: deps.media,
            media: MediaControl::new(),
            media_pending: false,
            negotiation_deferred: false,
            lookup: deps.lookup,
            session_info: None,
            pending_offer: None,
            subscriptions: Vec::new(),
            grace_timer: None,
            grace_epoch: 0,
            call_timer: None,
            call_attempt: 0,
            end_reason: None,
            inputs: channels.inputs,
            snapshot: channels.snapshot,
            events: channels.events,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Runs the session until it ends.
    pub(crate) async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<Input>) {
        self.start().await;
        self.publish();
        while !self.state.is_terminal() {
            let Some(input) = inputs.recv().await else {
                break;
            };
            self.handle(input).await;
            self.publish();
        }
        if !self.state.is_terminal() {
            self.finish(CallTrigger::Teardown, EndReason::Teardown).await;
            self.publish();
        }
        inputs.close();
        while let Ok(input) = inputs.try_recv() {
            input.release();
        }
        debug!("session {} actor finished", self.config.session_id);
    }

    async fn start(&mut self) {
        for event in SERVER_EVENTS
            .iter()
            .copied()
            .chain([CONNECT_EVENT, DISCONNECT_EVENT])
        {
            let tx = self.inputs.clone();
            let name = event.to_owned();
            let sub = self.signaling.on(event, move |data| {
                let _ = tx.send(Input::Signal(Envelope::new(name.clone(), data.clone())));
            });
            self.subscriptions.push(sub);
        }

        self.request_user_media();

        if let Some(lookup) = self.lookup.clone() {
            let tx = self.inputs.clone();
            let session_id = self.config.session_id.clone();
            tokio::spawn(async move {
                let result = lookup.fetch(&session_id).await.map_err(|e| e.to_string());
                let _ = tx.send(Input::Lookup(result));
            });
        }

        self.signaling
            .connect(&self.config.signaling_url, self.config.auth_token.as_deref())
            .await;
        if !self.signaling.is_connected() {
            self.report(ChannelError::NotConnected);
        }
    }

    fn request_user_media(&mut self) {
        if self.media_pending || self.peers.local_stream().is_some() {
            return;
        }
        self.media_pending = true;
        let source = self.media_source.clone();
        let tx = self.inputs.clone();
        tokio::spawn(async move {
            let result = source.acquire_user_media(MediaConstraints::default()).await;
            if let Err(mpsc::error::SendError(input)) = tx.send(Input::MediaReady(result)) {
                input.release();
            }
        });
    }

    pub(crate) async fn handle(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.on_command(command).await,
            Input::Signal(envelope) => self.on_signal(envelope).await,
            Input::Peer { epoch, event } => self.on_peer_event(epoch, event),
            Input::MediaReady(result) => self.on_media_ready(result).await,
            Input::ScreenCaptured { generation, result } => {
                self.on_screen_captured(generation, result).await
            }
            Input::ScreenTrackEnded { track_id } => {
                if self.media.on_screen_track_ended(&track_id, &self.peers).await {
                    self.notify(UiEvent::ScreenShareStopped);
                }
            }
            Input::GraceExpired { epoch } => self.on_grace_expired(epoch).await,
            Input::CallTimeout { attempt } => self.on_call_timeout(attempt).await,
            Input::Lookup(Ok(info)) => {
                debug!("session metadata loaded: {:?}", info.title);
                self.session_info = Some(info);
            }
            Input::Lookup(Err(e)) => {
                warn!("session lookup failed: {e}");
                self.notify(UiEvent::LookupFailed(e));
            }
        }
    }

    // ---- local actions ----

    async fn on_command(&mut self, command: Command) {
        debug!("command {:?} in {}", command, self.state);
        match command {
            Command::StartCall => {
                if !self.transition(CallTrigger::StartCall) {
                    return;
                }
                self.send(ClientMessage::StartVideoCall {
                    session_id: self.config.session_id.clone(),
                });
                self.arm_call_timer();
                if self.config.role == Role::Requester {
                    self.negotiate().await;
                }
            }
            Command::AcceptCall => {
                if !self.transition(CallTrigger::LocalAccept) {
                    return;
                }
                self.send(ClientMessage::AcceptCall {
                    session_id: self.config.session_id.clone(),
                });
                self.negotiate().await;
            }
            Command::RejectCall => {
                if self.transition(CallTrigger::LocalReject) {
                    self.send(ClientMessage::RejectCall {
                        session_id: self.config.session_id.clone(),
                    });
                    self.abandon_attempt().await;
                }
            }
            Command::CancelCall => {
                if self.transition(CallTrigger::LocalCancel) {
                    self.send(ClientMessage::EndCall {
                        session_id: self.config.session_id.clone(),
                    });
                    self.abandon_attempt().await;
                }
            }
            Command::EndCall => {
                if self.state.apply(CallTrigger::LocalEnd).is_ok() {
                    self.send(ClientMessage::EndCall {
                        session_id: self.config.session_id.clone(),
                    });
                }
                self.finish(CallTrigger::LocalEnd, EndReason::Local).await;
            }
            Command::Teardown => self.teardown().await,
            Command::ToggleAudio => match self.media.toggle_audio(&self.peers) {
                Some(enabled) if self.state == CallState::Active => {
                    self.send(ClientMessage::ToggleAudio {
                        session_id: self.config.session_id.clone(),
                        enabled,
                    });
                }
                Some(_) => {}
                None => warn!("no microphone track to toggle"),
            },
            Command::ToggleVideo => match self.media.toggle_video(&self.peers) {
                Some(enabled) if self.state == CallState::Active => {
                    self.send(ClientMessage::ToggleVideo {
                        session_id: self.config.session_id.clone(),
                        enabled,
                    });
                }
                Some(_) => {}
                None => warn!("no camera track to toggle"),
            },
            Command::StartScreenShare => self.start_screen_share(),
            Command::StopScreenShare => {
                if self.media.stop_screen_share(&self.peers).await {
                    self.notify(UiEvent::ScreenShareStopped);
                }
            }
            Command::SendMessage(text) => {
                if self.session.is_none() {
                    warn!("chat unavailable before the session is joined");
                    return;
                }
                let name = self.config.user_name.clone();
                match self.chat.send_message(&text, &name, &self.signaling) {
                    Ok(message) => {
                        let message = message.clone();
                        self.notify(UiEvent::ChatMessage(message));
                    }
                    Err(e) => debug!("chat message not sent: {e}"),
                }
            }
        }
    }

    fn start_screen_share(&mut self) {
        if self.state != CallState::Active || !self.peers.has_connection() {
            warn!("screen share needs an active call");
            return;
        }
        let Some(generation) = self.media.begin_screen_share() else {
            debug!("screen share already in progress");
            return;
        };
        let source = self.media_source.clone();
        let tx = self.inputs.clone();
        tokio::spawn(async move {
            let result = source.acquire_display_media().await;
            if let Err(mpsc::error::SendError(input)) =
                tx.send(Input::ScreenCaptured { generation, result })
            {
                input.release();
            }
        });
    }

    async fn on_screen_captured(
        &mut self,
        generation: u64,
        result: Result<Arc<LocalTrack>, PermissionError>,
    ) {
        match self
            .media
            .complete_screen_share(generation, result, &self.peers)
            .await
        {
            ScreenShareOutcome::Started(track) => {
                let tx = self.inputs.clone();
                tokio::spawn(async move {
                    track.ended().await;
                    let _ = tx.send(Input::ScreenTrackEnded {
                        track_id: track.id().to_owned(),
                    });
                });
                self.notify(UiEvent::ScreenShareStarted);
            }
            ScreenShareOutcome::Stale => debug!("stale screen capture released"),
            ScreenShareOutcome::Denied(e) => self.report(e),
            ScreenShareOutcome::Failed(reason) => warn!("screen share failed: {reason}"),
        }
    }

    async fn on_media_ready(&mut self, result: Result<LocalStream, PermissionError>) {
        self.media_pending = false;
        match result {
            Ok(stream) => {
                info!("local media ready ({})", stream.id);
                self.peers.set_local_stream(stream);
            }
            Err(e) => {
                error!("local media unavailable: {e}");
                self.report(e);
            }
        }
        if std::mem::take(&mut self.negotiation_deferred)
            && matches!(self.state, CallState::Calling | CallState::Active)
        {
            self.negotiate().await;
        }
    }

    // ---- signaling ----

    async fn on_signal(&mut self, envelope: Envelope) {
        match envelope.event.as_str() {
            CONNECT_EVENT => {
                self.connected = true;
                self.signaling
                    .register(&self.config.user_id, &self.config.user_name, self.config.role);
                self.signaling.join_session(
                    &self.config.session_id,
                    &self.config.user_id,
                    &self.config.user_name,
                    self.config.role,
                );
                self.check_ready();
                return;
            }
            DISCONNECT_EVENT => {
                self.connected = false;
                self.notify(UiEvent::ChannelLost);
                self.report(ChannelError::Dropped("signaling server went away".into()));
                return;
            }
            _ => {}
        }

        let event = match ServerEvent::parse(&envelope) {
            Ok(event) => event,
            Err(e) => {
                warn!("{e}");
                return;
            }
        };
        match event {
            ServerEvent::SessionParticipants(list) => {
                let roster = list.into_vec();
                info!("joined session {} ({} present)", self.config.session_id, roster.len());
                self.session_mut().roster.init(roster);
                self.check_ready();
            }
            ServerEvent::SessionReady { count, .. } => {
                debug!("session ready announced (count {:?})", count);
                self.check_ready();
            }
            ServerEvent::UserJoined(payload) => {
                let participant = payload.into_participant();
                info!("{} joined as {}", participant.user_name, participant.role);
                self.session_mut().roster.join(participant);
                self.check_ready();
            }
            ServerEvent::UserLeft(left) => {
                let removed = self.session.as_mut().and_then(|s| {
                    s.roster
                        .leave(left.connection_id.as_deref(), left.user_id.as_deref())
                });
                match removed {
                    Some(p) if self.state == CallState::Active => {
                        warn!("{} left during an active call", p.user_name)
                    }
                    Some(p) => info!("{} left", p.user_name),
                    None => debug!("user-left for unknown participant"),
                }
            }
            ServerEvent::IncomingCall { from, .. } => {
                if self.state == CallState::Incoming {
                    debug!("duplicate incoming-call from {:?}", from);
                } else if self.transition(CallTrigger::RemoteOffer) {
                    self.arm_call_timer();
                }
            }
            ServerEvent::CallAccepted { .. } => {
                if self.transition(CallTrigger::RemoteAccepted)
                    && self.config.role == Role::Helper
                    && !self.peers.has_connection()
                {
                    self.negotiate().await;
                }
            }
            ServerEvent::CallRejected { .. } => {
                if self.transition(CallTrigger::RemoteRejected) {
                    self.abandon_attempt().await;
                }
            }
            ServerEvent::CallEnded { .. } => match self.state {
                CallState::Incoming => {
                    if self.transition(CallTrigger::RemoteCancel) {
                        self.abandon_attempt().await;
                    }
                }
                _ => self.finish(CallTrigger::RemoteEnd, EndReason::Remote).await,
            },
            ServerEvent::WebrtcOffer { offer, .. } => self.on_remote_offer(offer).await,
            ServerEvent::WebrtcAnswer { answer, .. } => self.on_remote_answer(answer).await,
            ServerEvent::WebrtcIceCandidate { candidate, .. } => {
                if !matches!(
                    self.state,
                    CallState::Ready | CallState::Calling | CallState::Incoming | CallState::Active
                ) {
                    self.violation("webrtc-ice-candidate");
                    return;
                }
                match self.peers.add_remote_ice_candidate(candidate).await {
                    Ok(applied) => debug!("remote candidate {}", if applied { "applied" } else { "buffered" }),
                    Err(e) => warn!("remote candidate refused: {e}"),
                }
            }
            ServerEvent::NewMessage {
                message,
                user_name,
                timestamp,
                from,
                ..
            } => {
                let sender = user_name.unwrap_or_else(|| "unknown".to_owned());
                let message = self
                    .chat
                    .on_remote_message(sender, from, message, timestamp)
                    .clone();
                self.notify(UiEvent::ChatMessage(message));
            }
            ServerEvent::ToggleAudio { enabled, .. } => self.media.set_remote_audio(enabled),
            ServerEvent::ToggleVideo { enabled, .. } => self.media.set_remote_video(enabled),
        }
    }

    fn session_mut(&mut self) -> &mut Session {
        let id = self.config.session_id.clone();
        self.session.get_or_insert_with(|| Session {
            id,
            created_at: now_millis(),
            roster: ParticipantRegistry::new(),
        })
    }

    fn check_ready(&mut self) {
        if self.state != CallState::Connecting || !self.connected {
            return;
        }
        if self.session.as_ref().is_some_and(|s| s.roster.is_complete()) {
            self.transition(CallTrigger::Ready);
        }
    }

    async fn on_remote_offer(&mut self, offer: SessionDescription) {
        if self.config.role == Role::Requester {
            // requesters always offer
            self.violation("webrtc-offer");
            return;
        }
        match self.state {
            CallState::Ready => {
                self.pending_offer = Some(offer);
                if self.transition(CallTrigger::RemoteOffer) {
                    self.arm_call_timer();
                }
            }
            CallState::Incoming => self.pending_offer = Some(offer),
            CallState::Active => {
                let answerable = self.peers.has_connection()
                    && self.peers.record().is_some_and(|r| !r.has_remote());
                if answerable {
                    self.answer(offer).await;
                } else {
                    // connection still waiting for local media
                    self.pending_offer = Some(offer);
                }
            }
            _ => self.violation("webrtc-offer"),
        }
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) {
        if self.config.role != Role::Requester
            || !matches!(self.state, CallState::Calling | CallState::Active)
        {
            self.violation("webrtc-answer");
            return;
        }
        match self.peers.set_remote_description(answer).await {
            Ok(flushed) => debug!("answer applied, {flushed} buffered candidates flushed"),
            Err(e) => self.negotiation_failed(e).await,
        }
    }

    // ---- negotiation ----

    fn negotiation_role(&self) -> NegotiationRole {
        match self.config.role {
            Role::Requester => NegotiationRole::Offerer,
            Role::Helper => NegotiationRole::Answerer,
        }
    }

    async fn negotiate(&mut self) {
        if self.media_pending {
            debug!("waiting for local media before negotiating");
            self.negotiation_deferred = true;
            return;
        }
        let role = self.negotiation_role();
        if let Err(e) = self.peers.create_connection(role).await {
            self.negotiation_failed(e).await;
            return;
        }
        match role {
            NegotiationRole::Offerer => {
                if let Err(e) = self.peers.create_offer().await {
                    self.negotiation_failed(e).await;
                }
            }
            NegotiationRole::Answerer => {
                if let Some(offer) = self.pending_offer.take() {
                    self.answer(offer).await;
                }
            }
        }
    }

    async fn answer(&mut self, offer: SessionDescription) {
        match self.peers.set_remote_description(offer).await {
            Ok(flushed) => debug!("offer applied, {flushed} buffered candidates flushed"),
            Err(e) => {
                self.negotiation_failed(e).await;
                return;
            }
        }
        if let Err(e) = self.peers.create_answer().await {
            self.negotiation_failed(e).await;
        }
    }

    /// Any negotiation error, engine failure or out-of-sequence step alike,
    /// aborts the negotiation and ends the call.
    async fn negotiation_failed(&mut self, e: NegotiationError) {
        error!("negotiation aborted: {e}");
        self.report(e);
        if matches!(
            self.state,
            CallState::Calling | CallState::Incoming | CallState::Active
        ) {
            self.send(ClientMessage::EndCall {
                session_id: self.config.session_id.clone(),
            });
        }
        self.finish(CallTrigger::Teardown, EndReason::NegotiationFailed)
            .await;
    }

    /// Drops the failed attempt's connection but keeps local media.
    async fn abandon_attempt(&mut self) {
        self.pending_offer = None;
        self.negotiation_deferred = false;
        self.media.release();
        self.peers.reset().await;
    }

    // ---- peer connection ----

    fn on_peer_event(&mut self, epoch: u64, event: PeerEvent) {
        if !self.peers.is_current(epoch) {
            debug!("dropping {:?} from stale connection (epoch {epoch})", event);
            return;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => self.peers.forward_local_candidate(candidate),
            PeerEvent::GatheringComplete => {
                let summary = self.peers.gathering_complete();
                info!(
                    "ICE gathering complete: {} host, {} srflx, {} relay",
                    summary.host, summary.srflx, summary.relay
                );
            }
            PeerEvent::RemoteTrack(info) => {
                debug!("remote {:?} track {}", info.kind, info.id);
                self.peers.note_remote_track(info.clone());
                self.notify(UiEvent::RemoteTrack(info));
            }
            PeerEvent::StateChanged(state) => self.on_peer_state(epoch, state),
        }
    }

    fn on_peer_state(&mut self, epoch: u64, state: PeerState) {
        let previous = self.peers.peer_state();
        self.peers.note_state(state);
        debug!("peer connection {:?} -> {:?}", previous, state);
        match state {
            PeerState::Connected => {
                if let Some(timer) = self.grace_timer.take() {
                    timer.abort();
                    info!("peer connection recovered");
                    self.notify(UiEvent::ConnectionRecovered);
                }
            }
            PeerState::Disconnected | PeerState::Failed => {
                if self.state != CallState::Active || self.grace_timer.is_some() {
                    return;
                }
                warn!("peer connection {:?}, waiting {:?} for recovery", state, self.config.grace_period());
                self.notify(UiEvent::ConnectionProblem);
                self.grace_epoch = epoch;
                let tx = self.inputs.clone();
                let grace = self.config.grace_period();
                self.grace_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = tx.send(Input::GraceExpired { epoch });
                }));
            }
            _ => {}
        }
    }

    async fn on_grace_expired(&mut self, epoch: u64) {
        if self.grace_timer.take().is_none() || epoch != self.grace_epoch {
            return;
        }
        if self.peers.peer_state() == PeerState::Connected || self.state != CallState::Active {
            return;
        }
        let grace_secs = self.config.grace_period().as_secs();
        error!("ICE did not recover within {grace_secs}s");
        self.report(ConnectivityError::IceFailed { grace_secs });
        self.send(ClientMessage::EndCall {
            session_id: self.config.session_id.clone(),
        });
        self.finish(CallTrigger::IceFailed, EndReason::ConnectionLost)
            .await;
    }

    // ---- unanswered call ----

    fn arm_call_timer(&mut self) {
        let Some(timeout) = self.config.call_timeout() else {
            return;
        };
        self.disarm_call_timer();
        self.call_attempt += 1;
        let attempt = self.call_attempt;
        let tx = self.inputs.clone();
        self.call_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Input::CallTimeout { attempt });
        }));
    }

    fn disarm_call_timer(&mut self) {
        if let Some(timer) = self.call_timer.take() {
            timer.abort();
        }
    }

    async fn on_call_timeout(&mut self, attempt: u64) {
        if attempt != self.call_attempt || self.call_timer.take().is_none() {
            return;
        }
        match self.state {
            CallState::Calling => {
                info!("call unanswered, cancelling");
                self.notify(UiEvent::CallTimedOut);
                self.on_command(Command::CancelCall).await;
            }
            CallState::Incoming => {
                info!("incoming call not answered, rejecting");
                self.notify(UiEvent::CallTimedOut);
                self.on_command(Command::RejectCall).await;
            }
            _ => {}
        }
    }

    // ---- teardown ----

    async fn teardown(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let farewell = match self.state {
            CallState::Calling | CallState::Active => Some(ClientMessage::EndCall {
                session_id: self.config.session_id.clone(),
            }),
            CallState::Incoming => Some(ClientMessage::RejectCall {
                session_id: self.config.session_id.clone(),
            }),
            _ => None,
        };
        if let Some(message) = farewell {
            self.send(message);
        }
        self.finish(CallTrigger::Teardown, EndReason::Teardown).await;
    }

    /// Moves to `Ended` through `trigger` and releases everything the session holds.
    async fn finish(&mut self, trigger: CallTrigger, reason: EndReason) {
        if !self.transition(trigger) {
            return;
        }
        self.disarm_call_timer();
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
        self.subscriptions.clear();
        self.media.release();
        self.peers.close().await;
        self.pending_offer = None;
        self.session = None;
        self.signaling.disconnect();
        self.connected = false;
        self.end_reason = Some(reason);
        info!("call ended ({reason})");
        self.notify(UiEvent::Ended(reason));
    }

    // ---- helpers ----

    fn transition(&mut self, trigger: CallTrigger) -> bool {
        match self.state.apply(trigger) {
            Ok(next) => {
                let from = self.state;
                self.state = next;
                info!("call state {from} -> {next} ({trigger})");
                if !matches!(next, CallState::Calling | CallState::Incoming) {
                    self.disarm_call_timer();
                }
                self.notify(UiEvent::StateChanged { from, to: next });
                true
            }
            Err(violation) => {
                warn!("{violation}");
                false
            }
        }
    }

    fn violation(&self, event: &str) {
        warn!("`{event}` is not valid while {}", self.state);
    }

    fn send(&self, message: ClientMessage) {
        if !self.signaling.send(&message) {
            debug!("signaling message dropped");
        }
    }

    fn report(&self, error: impl Into<CallError>) {
        let error = error.into();
        warn!("{} ({error})", error.user_message());
        self.notify(UiEvent::Error(error));
    }

    fn notify(&self, event: UiEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let snapshot = CallSnapshot {
            session_id: self.config.session_id.clone(),
            role: self.config.role,
            state: self.state,
            connected: self.connected,
            joined: self.session.is_some(),
            participants: self
                .session
                .as_ref()
                .map(|s| s.roster.participants().to_vec())
                .unwrap_or_default(),
            media: self.media.state(&self.peers),
            peer_state: self.peers.peer_state(),
            messages: self.chat.messages().to_vec(),
            session_info: self.session_info.clone(),
            end_reason: self.end_reason,
        };
        self.snapshot.send_replace(snapshot);
    }
}
