use crate::signaling::{ClientMessage, SignalingClient};
use crate::utils::now_millis;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub session_id: String,
    pub sender_name: String,
    /// `None` for messages sent from this client.
    pub sender_connection_id: Option<String>,
    pub text: String,
    pub timestamp: i64,
    /// Local arrival order.
    pub seq: u64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat message is empty")]
    Empty,
}

/// Append-only chat log. Order is local arrival order only.
#[derive(Debug)]
pub struct ChatChannel {
    session_id: String,
    log: Vec<ChatMessage>,
    next_seq: u64,
}

impl ChatChannel {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            log: Vec::new(),
            next_seq: 0,
        }
    }

    fn append(&mut self, sender_name: String, sender_connection_id: Option<String>, text: String, timestamp: i64) -> &ChatMessage {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.log.push(ChatMessage {
            session_id: self.session_id.clone(),
            sender_name,
            sender_connection_id,
            text,
            timestamp,
            seq,
        });
        &self.log[self.log.len() - 1]
    }

    /// Appends locally first, then emits; transmission failure leaves the log as is.
    pub fn send_message(
        &mut self,
        text: &str,
        sender_name: &str,
        signaling: &SignalingClient,
    ) -> Result<&ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Empty);
        }
        let sent = signaling.send(&ClientMessage::SendMessage {
            session_id: self.session_id.clone(),
            message: text.to_owned(),
            user_name: sender_name.to_owned(),
        });
        if !sent {
            debug!("chat message kept locally, transmission failed");
        }
        Ok(self.append(sender_name.to_owned(), None, text.to_owned(), now_millis()))
    }

    pub fn on_remote_message(
        &mut self,
        sender_name: String,
        sender_connection_id: Option<String>,
        text: String,
        timestamp: Option<i64>,
    ) -> &ChatMessage {
        self.append(
            sender_name,
            sender_connection_id,
            text,
            timestamp.unwrap_or_else(now_millis),
        )
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::offline_signaling;

    #[test]
    fn local_message_is_logged_once_even_when_offline() {
        let signaling = offline_signaling();
        let mut chat = ChatChannel::new("s-1");
        let msg = chat.send_message("  hello  ", "Ann", &signaling).unwrap().clone();
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.seq, 0);
        assert_eq!(chat.messages(), &[msg]);
    }

    #[test]
    fn blank_messages_are_rejected() {
        let signaling = offline_signaling();
        let mut chat = ChatChannel::new("s-1");
        assert_eq!(chat.send_message(" \n\t", "Ann", &signaling), Err(ChatError::Empty));
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn arrival_order_wins_over_timestamps() {
        let signaling = offline_signaling();
        let mut chat = ChatChannel::new("s-1");
        chat.on_remote_message("Bo".into(), Some("c2".into()), "late".into(), Some(2_000));
        chat.send_message("mine", "Ann", &signaling).unwrap();
        chat.on_remote_message("Bo".into(), Some("c2".into()), "early".into(), Some(1_000));
        let texts: Vec<_> = chat.messages().iter().map(|m| (m.seq, m.text.as_str())).collect();
        assert_eq!(texts, vec![(0, "late"), (1, "mine"), (2, "early")]);
    }
}
