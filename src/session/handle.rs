use crate::config::CallConfig;
use crate::lookup::{HttpSessionLookup, SessionLookup};
use crate::media::{MediaSource, SyntheticMediaSource};
use crate::peer::{PeerFactory, WebRtcPeerFactory};
use crate::session::coordinator::{
    CallCoordinator, CallSnapshot, Channels, Collaborators, Command, Input, UiEvent,
};
use crate::session::state::CallState;
use crate::signaling::{SignalingClient, SignalingTransport, WebSocketTransport};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// The pluggable edges of a call session.
pub struct SessionDeps {
    pub transport: Arc<dyn SignalingTransport>,
    pub peers: Arc<dyn PeerFactory>,
    pub media: Arc<dyn MediaSource>,
    pub lookup: Option<Arc<dyn SessionLookup>>,
}

impl SessionDeps {
    /// WebSocket signaling, the webrtc engine, sample-fed local media and the
    /// HTTP session lookup when a lookup URL is configured.
    pub fn production(config: &CallConfig) -> Self {
        let lookup = config.lookup_url.as_ref().and_then(|url| {
            match HttpSessionLookup::new(url.clone(), config.auth_token.clone()) {
                Ok(lookup) => Some(Arc::new(lookup) as Arc<dyn SessionLookup>),
                Err(e) => {
                    warn!("session lookup disabled: {e}");
                    None
                }
            }
        });
        Self {
            transport: Arc::new(WebSocketTransport),
            peers: Arc::new(WebRtcPeerFactory),
            media: Arc::new(SyntheticMediaSource::new()),
            lookup,
        }
    }
}

/// Handle to a running call session. Views send commands and read state
/// through it; dropping it tears the session down.
pub struct CallSession {
    inputs: mpsc::UnboundedSender<Input>,
    snapshot: watch::Receiver<CallSnapshot>,
    events: broadcast::Sender<UiEvent>,
    task: Option<JoinHandle<()>>,
}

impl CallSession {
    /// Spawns the session actor. Must be called inside a tokio runtime.
    pub fn start(config: CallConfig, deps: SessionDeps) -> Self {
        let (inputs, inputs_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(CallSnapshot::initial(&config));
        let (events, _) = broadcast::channel(256);

        let signaling = Arc::new(SignalingClient::new(deps.transport));
        let coordinator = CallCoordinator::new(
            config,
            Collaborators {
                signaling,
                peers: deps.peers,
                media: deps.media,
                lookup: deps.lookup,
            },
            Channels {
                inputs: inputs.clone(),
                snapshot: snapshot_tx,
                events: events.clone(),
            },
        );
        let task = tokio::spawn(coordinator.run(inputs_rx));
        Self {
            inputs,
            snapshot,
            events,
            task: Some(task),
        }
    }

    /// Queues a command. `false` once the session has ended.
    pub fn command(&self, command: Command) -> bool {
        self.inputs.send(Input::Command(command)).is_ok()
    }

    pub fn start_call(&self) -> bool {
        self.command(Command::StartCall)
    }

    pub fn accept_call(&self) -> bool {
        self.command(Command::AcceptCall)
    }

    pub fn reject_call(&self) -> bool {
        self.command(Command::RejectCall)
    }

    pub fn cancel_call(&self) -> bool {
        self.command(Command::CancelCall)
    }

    pub fn end_call(&self) -> bool {
        self.command(Command::EndCall)
    }

    pub fn toggle_audio(&self) -> bool {
        self.command(Command::ToggleAudio)
    }

    pub fn toggle_video(&self) -> bool {
        self.command(Command::ToggleVideo)
    }

    pub fn start_screen_share(&self) -> bool {
        self.command(Command::StartScreenShare)
    }

    pub fn stop_screen_share(&self) -> bool {
        self.command(Command::StopScreenShare)
    }

    pub fn send_message(&self, text: impl Into<String>) -> bool {
        self.command(Command::SendMessage(text.into()))
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Resolves with the first snapshot satisfying `pred`, or `None` if the
    /// session finished without reaching one.
    pub async fn wait_for(&self, pred: impl Fn(&CallSnapshot) -> bool) -> Option<CallSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(|s| pred(s)).await.ok()?.clone();
        Some(snapshot)
    }

    pub async fn wait_for_state(&self, state: CallState) -> Option<CallSnapshot> {
        self.wait_for(|s| s.state == state).await
    }

    /// Tears the session down and waits for the actor to release everything.
    pub async fn shutdown(mut self) -> CallSnapshot {
        let _ = self.inputs.send(Input::Command(Command::Teardown));
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("session task failed: {e}");
            }
        }
        self.snapshot()
    }

    /// Waits for the session to end on its own.
    pub async fn finished(mut self) -> CallSnapshot {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("session task failed: {e}");
            }
        }
        self.snapshot()
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.inputs.send(Input::Command(Command::Teardown));
        }
    }
}
