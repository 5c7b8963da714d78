use thiserror::Error;

/// Camera, microphone or display capture was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("user media access denied: {0}")]
    UserMediaDenied(String),
    #[error("display capture denied: {0}")]
    DisplayCaptureDenied(String),
}

/// Signaling transport failures. Reconnection belongs to the transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid signaling endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("failed to connect to signaling server: {0}")]
    Connect(String),
    #[error("signaling channel dropped: {0}")]
    Dropped(String),
    #[error("signaling channel not connected")]
    NotConnected,
    #[error("malformed signaling frame: {0}")]
    Malformed(String),
}

/// SDP/ICE applied out of sequence, or the engine refused a description.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("no negotiation in progress")]
    NotInProgress,
    #[error("remote description already applied for this negotiation")]
    RemoteAlreadySet,
    #[error("{0} is not valid for the {1:?} role")]
    WrongRole(&'static str, crate::peer::NegotiationRole),
    #[error("peer connection engine error: {0}")]
    Backend(String),
}

/// ICE entered the failed state and did not recover within the grace period.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("ICE connection failed and did not recover within {grace_secs}s")]
    IceFailed { grace_secs: u64 },
}

/// An event that is not valid in the current call state. Logged and ignored.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("`{event}` is not valid while {state}")]
pub struct ProtocolViolation {
    pub event: String,
    pub state: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

impl CallError {
    /// Copy shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::Permission(_) => "cannot access camera/microphone — check permissions",
            CallError::Channel(_) | CallError::Connectivity(_) => "connection lost",
            CallError::Negotiation(_) => "call setup failed",
            CallError::Protocol(_) => "unexpected call event ignored",
        }
    }

    /// Whether the UI should offer a retry affordance.
    pub fn retryable(&self) -> bool {
        matches!(self, CallError::Channel(_) | CallError::Connectivity(_))
    }
}

pub type Result<T, E = CallError> = std::result::Result<T, E>;
