use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ParticipantId};

/// Display label used for notices generated locally.
pub const SYSTEM_SENDER: &str = "System";

/// Whether a message was typed by a participant or generated as a notice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    User,
    System,
}

/// One chat entry. Log order is insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    /// Display label of the sender.
    pub sender: String,
    /// Stable identity of the sender.
    pub author: ParticipantId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: MessageKind,
}

impl ChatMessage {
    pub fn user(author: ParticipantId, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: sender.into(),
            author,
            content: content.into(),
            timestamp: Utc::now(),
            kind: MessageKind::User,
        }
    }

    pub fn system(author: ParticipantId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: SYSTEM_SENDER.to_string(),
            author,
            content: content.into(),
            timestamp: Utc::now(),
            kind: MessageKind::System,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_fields() {
        let author = ParticipantId::from_raw("user_1");
        let msg = ChatMessage::user(author.clone(), "Ada", "hello");
        assert_eq!(msg.sender, "Ada");
        assert_eq!(msg.author, author);
        assert_eq!(msg.content, "hello");
        assert!(!msg.is_system());
    }

    #[test]
    fn system_message_uses_system_sender() {
        let msg = ChatMessage::system(ParticipantId::from_raw("user_1"), "You cleared the whiteboard");
        assert_eq!(msg.sender, SYSTEM_SENDER);
        assert!(msg.is_system());
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let msg = ChatMessage::user(ParticipantId::from_raw("user_1"), "Ada", "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sender"], "Ada");
        assert_eq!(json["author"], "user_1");
        assert_eq!(json["kind"], "user");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn kind_defaults_to_user_when_missing() {
        let json = r#"{"id":"msg_1","sender":"Bo","author":"user_2","content":"x","timestamp":"2026-01-01T00:00:00Z"}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind, MessageKind::User);
    }
}
