use crate::error::ProtocolViolation;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Connecting,
    Ready,
    Calling,
    Incoming,
    Active,
    Rejected,
    Ended,
}

impl CallState {
    pub const ALL: [CallState; 7] = [
        CallState::Connecting,
        CallState::Ready,
        CallState::Calling,
        CallState::Incoming,
        CallState::Active,
        CallState::Rejected,
        CallState::Ended,
    ];

    pub fn is_terminal(self) -> bool {
        self == CallState::Ended
    }

    /// Validates `trigger` against this state.
    pub fn apply(self, trigger: CallTrigger) -> Result<CallState, ProtocolViolation> {
        next_state(self, trigger).ok_or_else(|| ProtocolViolation {
            event: trigger.to_string(),
            state: self.to_string(),
        })
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Connecting => "connecting",
            CallState::Ready => "ready",
            CallState::Calling => "calling",
            CallState::Incoming => "incoming",
            CallState::Active => "active",
            CallState::Rejected => "rejected",
            CallState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Everything that can move the call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTrigger {
    /// Channel connected and the roster holds both participants.
    Ready,
    StartCall,
    /// `incoming-call` or an offer from the other side.
    RemoteOffer,
    RemoteAccepted,
    RemoteRejected,
    LocalCancel,
    LocalAccept,
    LocalReject,
    /// The caller gave up before we answered.
    RemoteCancel,
    LocalEnd,
    RemoteEnd,
    IceFailed,
    Teardown,
}

impl CallTrigger {
    pub const ALL: [CallTrigger; 13] = [
        CallTrigger::Ready,
        CallTrigger::StartCall,
        CallTrigger::RemoteOffer,
        CallTrigger::RemoteAccepted,
        CallTrigger::RemoteRejected,
        CallTrigger::LocalCancel,
        CallTrigger::LocalAccept,
        CallTrigger::LocalReject,
        CallTrigger::RemoteCancel,
        CallTrigger::LocalEnd,
        CallTrigger::RemoteEnd,
        CallTrigger::IceFailed,
        CallTrigger::Teardown,
    ];
}

impl fmt::Display for CallTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallTrigger::Ready => "ready",
            CallTrigger::StartCall => "start-call",
            CallTrigger::RemoteOffer => "remote-offer",
            CallTrigger::RemoteAccepted => "call-accepted",
            CallTrigger::RemoteRejected => "call-rejected",
            CallTrigger::LocalCancel => "cancel-call",
            CallTrigger::LocalAccept => "accept-call",
            CallTrigger::LocalReject => "reject-call",
            CallTrigger::RemoteCancel => "remote-cancel",
            CallTrigger::LocalEnd => "end-call",
            CallTrigger::RemoteEnd => "call-ended",
            CallTrigger::IceFailed => "ice-failed",
            CallTrigger::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// The transition table. `None` means the trigger is not valid in `state`.
pub fn next_state(state: CallState, trigger: CallTrigger) -> Option<CallState> {
    use CallState::*;
    use CallTrigger as T;
    match (state, trigger) {
        (Ended, T::Teardown) => None,
        (_, T::Teardown) => Some(Ended),
        (Connecting, T::Ready) => Some(Ready),
        (Ready, T::StartCall) => Some(Calling),
        (Ready, T::RemoteOffer) => Some(Incoming),
        (Calling, T::RemoteAccepted) => Some(Active),
        (Calling, T::RemoteRejected | T::LocalCancel) => Some(Rejected),
        (Incoming, T::LocalAccept) => Some(Active),
        (Incoming, T::LocalReject | T::RemoteCancel) => Some(Rejected),
        (Active, T::LocalEnd | T::RemoteEnd | T::IceFailed) => Some(Ended),
        _ => None,
    }
}

/// Why a call reached `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    Local,
    Remote,
    ConnectionLost,
    NegotiationFailed,
    Teardown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EndReason::Local => "local",
            EndReason::Remote => "remote",
            EndReason::ConnectionLost => "connection-lost",
            EndReason::NegotiationFailed => "negotiation-failed",
            EndReason::Teardown => "teardown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CallState::*;
    use CallTrigger as T;

    #[test]
    fn only_listed_edges_change_state() {
        let mut edges = vec![
            (Connecting, T::Ready, Ready),
            (Ready, T::StartCall, Calling),
            (Ready, T::RemoteOffer, Incoming),
            (Calling, T::RemoteAccepted, Active),
            (Calling, T::RemoteRejected, Rejected),
            (Calling, T::LocalCancel, Rejected),
            (Incoming, T::LocalAccept, Active),
            (Incoming, T::LocalReject, Rejected),
            (Incoming, T::RemoteCancel, Rejected),
            (Active, T::LocalEnd, Ended),
            (Active, T::RemoteEnd, Ended),
            (Active, T::IceFailed, Ended),
        ];
        for state in CallState::ALL {
            if state != Ended {
                edges.push((state, T::Teardown, Ended));
            }
        }

        for state in CallState::ALL {
            for trigger in CallTrigger::ALL {
                let expected = edges
                    .iter()
                    .find(|(s, t, _)| *s == state && *t == trigger)
                    .map(|(_, _, to)| *to);
                assert_eq!(next_state(state, trigger), expected, "{state} + {trigger}");
            }
        }
    }

    #[test]
    fn invalid_trigger_is_a_protocol_violation() {
        let err = Calling.apply(T::RemoteOffer).unwrap_err();
        assert_eq!(err.event, "remote-offer");
        assert_eq!(err.state, "calling");
        assert_eq!(Ready.apply(T::StartCall), Ok(Calling));
    }

    #[test]
    fn rejected_and_ended_are_dead_ends() {
        for trigger in CallTrigger::ALL {
            assert_eq!(next_state(Ended, trigger), None);
            if trigger != T::Teardown {
                assert_eq!(next_state(Rejected, trigger), None);
            }
        }
    }
}
