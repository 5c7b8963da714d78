//! Wire format of the signaling channel.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`.
//! Event names and payload field names follow the browser client
//! (kebab-case events, camelCase fields).

use crate::error::ChannelError;
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::session::registry::{Participant, Role};
use crate::utils::millis_or_rfc3339;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raised locally when the transport comes up.
pub const CONNECT_EVENT: &str = "connect";
/// Raised locally when the transport goes away.
pub const DISCONNECT_EVENT: &str = "disconnect";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Messages this client sends.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    RegisterUser {
        user_id: String,
        name: String,
        role: Role,
    },
    #[serde(rename_all = "camelCase")]
    JoinSession {
        session_id: String,
        user_id: String,
        user_name: String,
        user_role: Role,
    },
    #[serde(rename_all = "camelCase")]
    StartVideoCall { session_id: String },
    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        session_id: String,
        offer: SessionDescription,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        session_id: String,
        answer: SessionDescription,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcIceCandidate {
        session_id: String,
        candidate: IceCandidate,
    },
    #[serde(rename_all = "camelCase")]
    AcceptCall { session_id: String },
    #[serde(rename_all = "camelCase")]
    RejectCall { session_id: String },
    #[serde(rename_all = "camelCase")]
    EndCall { session_id: String },
    #[serde(rename_all = "camelCase")]
    ToggleAudio { session_id: String, enabled: bool },
    #[serde(rename_all = "camelCase")]
    ToggleVideo { session_id: String, enabled: bool },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        session_id: String,
        message: String,
        user_name: String,
    },
}

impl ClientMessage {
    pub fn to_envelope(&self) -> Result<Envelope, ChannelError> {
        serde_json::to_value(self)
            .and_then(serde_json::from_value)
            .map_err(|e| ChannelError::Malformed(e.to_string()))
    }
}

/// `session-participants` comes as a bare array or wrapped under
/// `participants` or `list`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParticipantList {
    Wrapped { participants: Vec<Participant> },
    Listed { list: Vec<Participant> },
    Bare(Vec<Participant>),
}

impl ParticipantList {
    pub fn into_vec(self) -> Vec<Participant> {
        match self {
            ParticipantList::Wrapped { participants } => participants,
            ParticipantList::Listed { list } | ParticipantList::Bare(list) => list,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParticipantPayload {
    Wrapped { participant: Participant },
    Bare(Participant),
}

impl ParticipantPayload {
    pub fn into_participant(self) -> Participant {
        match self {
            ParticipantPayload::Wrapped { participant } => participant,
            ParticipantPayload::Bare(p) => p,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    #[serde(default, rename = "socketId", alias = "connectionId")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

/// Messages the server pushes to this client.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    SessionParticipants(ParticipantList),
    SessionReady {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        count: Option<usize>,
    },
    UserJoined(ParticipantPayload),
    UserLeft(UserLeft),
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    CallAccepted {
        #[serde(default)]
        from: Option<String>,
    },
    CallRejected {
        #[serde(default)]
        from: Option<String>,
    },
    CallEnded {
        #[serde(default)]
        from: Option<String>,
    },
    WebrtcOffer {
        offer: SessionDescription,
        #[serde(default)]
        from: Option<String>,
    },
    WebrtcAnswer {
        answer: SessionDescription,
        #[serde(default)]
        from: Option<String>,
    },
    WebrtcIceCandidate {
        candidate: IceCandidate,
        #[serde(default)]
        from: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        #[serde(default)]
        session_id: Option<String>,
        message: String,
        #[serde(default)]
        user_name: Option<String>,
        #[serde(default, deserialize_with = "millis_or_rfc3339")]
        timestamp: Option<i64>,
        #[serde(default, alias = "senderId")]
        from: Option<String>,
    },
    ToggleAudio {
        enabled: bool,
        #[serde(default)]
        from: Option<String>,
    },
    ToggleVideo {
        enabled: bool,
        #[serde(default)]
        from: Option<String>,
    },
}

/// Names of every event `ServerEvent` understands, for subscription.
pub const SERVER_EVENTS: &[&str] = &[
    "session-participants",
    "session-ready",
    "user-joined",
    "user-left",
    "incoming-call",
    "call-accepted",
    "call-rejected",
    "call-ended",
    "webrtc-offer",
    "webrtc-answer",
    "webrtc-ice-candidate",
    "new-message",
    "toggle-audio",
    "toggle-video",
];

impl ServerEvent {
    pub fn parse(envelope: &Envelope) -> Result<ServerEvent, ChannelError> {
        // `call-accepted` and friends may come with no payload at all
        let data = match &envelope.data {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(serde_json::json!({ "event": envelope.event, "data": data }))
            .map_err(|e| ChannelError::Malformed(format!("{}: {e}", envelope.event)))
    }
}
