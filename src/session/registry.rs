use crate::utils::millis_or_rfc3339;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    Helper,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Requester => "requester",
            Role::Helper => "helper",
        })
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requester" => Ok(Role::Requester),
            "helper" => Ok(Role::Helper),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(rename = "socketId", alias = "connectionId")]
    pub connection_id: String,
    pub user_id: String,
    #[serde(alias = "name")]
    pub user_name: String,
    #[serde(rename = "userRole", alias = "role")]
    pub role: Role,
    #[serde(
        default,
        deserialize_with = "millis_or_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub joined_at: Option<i64>,
}

/// Session roster, mutated only by join/leave events.
#[derive(Debug, Default, Clone)]
pub struct ParticipantRegistry {
    participants: Vec<Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the roster with the list sent on join acknowledgment.
    pub fn init(&mut self, roster: Vec<Participant>) {
        self.participants.clear();
        for participant in roster {
            self.join(participant);
        }
    }

    /// Adds `participant` unless its connection id is already listed.
    pub fn join(&mut self, participant: Participant) -> bool {
        if self
            .participants
            .iter()
            .any(|p| p.connection_id == participant.connection_id)
        {
            debug!("participant {} already listed", participant.connection_id);
            return false;
        }
        self.participants.push(participant);
        true
    }

    /// Removes by connection id, falling back to user id when the leave
    /// event carries no connection id.
    pub fn leave(&mut self, connection_id: Option<&str>, user_id: Option<&str>) -> Option<Participant> {
        let index = match (connection_id, user_id) {
            (Some(id), _) => self.participants.iter().position(|p| p.connection_id == id),
            (None, Some(id)) => self.participants.iter().position(|p| p.user_id == id),
            (None, None) => None,
        }?;
        Some(self.participants.remove(index))
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Both sides of the consultation are present.
    pub fn is_complete(&self) -> bool {
        self.participants.len() >= 2
    }

    /// The first participant that is not `user_id`.
    pub fn remote_participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id != user_id)
    }
}
