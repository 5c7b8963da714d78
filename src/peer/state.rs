use crate::peer::ice::CandidateQueue;
use crate::peer::types::{IceCandidate, SessionDescription};

/// Which side of offer/answer this peer plays. Fixed by participant role:
/// requesters offer, helpers answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

/// Per-attempt negotiation state. Replaced wholesale on every new call attempt.
#[derive(Debug)]
pub struct NegotiationRecord {
    pub epoch: u64,
    pub role: NegotiationRole,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    /// Remote candidates waiting for the remote description.
    pub pending: CandidateQueue,
    /// Remote candidates the engine accepted, in the order they were applied.
    pub applied: Vec<IceCandidate>,
    /// Local candidates gathered so far.
    pub gathered: Vec<IceCandidate>,
}

impl NegotiationRecord {
    pub fn new(epoch: u64, role: NegotiationRole) -> Self {
        Self {
            epoch,
            role,
            local: None,
            remote: None,
            pending: CandidateQueue::default(),
            applied: Vec::new(),
            gathered: Vec::new(),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}
