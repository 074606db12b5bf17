//! Tagged events exchanged over the messaging channel.
//!
//! Every frame is a JSON object `{"event": "<kebab-name>", "data": {...}}`.
//! Unknown events and malformed payloads are rejected at decode time.

use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::code::CodeUpdate;
use crate::errors::ProtocolError;
use crate::files::{FileChunk, FileOffer};
use crate::ids::{ParticipantId, PeerId, SessionId};

/// A room member as announced to others.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub participant_id: ParticipantId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
}

/// Client → server events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    JoinRoom {
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
    },
    LeaveRoom {
        session_id: SessionId,
    },
    SendMessage {
        session_id: SessionId,
        message: ChatMessage,
    },
    ShareFile {
        session_id: SessionId,
        file: FileOffer,
    },
    FileChunk {
        session_id: SessionId,
        chunk: FileChunk,
    },
    CodeUpdate {
        session_id: SessionId,
        update: CodeUpdate,
    },
}

impl ClientMessage {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::JoinRoom { session_id, .. }
            | Self::LeaveRoom { session_id }
            | Self::SendMessage { session_id, .. }
            | Self::ShareFile { session_id, .. }
            | Self::FileChunk { session_id, .. }
            | Self::CodeUpdate { session_id, .. } => session_id,
        }
    }

    /// Event name as it appears on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::SendMessage { .. } => "send-message",
            Self::ShareFile { .. } => "share-file",
            Self::FileChunk { .. } => "file-chunk",
            Self::CodeUpdate { .. } => "code-update",
        }
    }
}

/// Server → client events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Join accepted. `participants` counts the joiner.
    Joined {
        session_id: SessionId,
        participant_id: ParticipantId,
        participants: usize,
    },
    IdentityRejected {
        session_id: SessionId,
        participant_id: ParticipantId,
        reason: String,
    },
    PeerJoined {
        session_id: SessionId,
        peer: PeerInfo,
    },
    PeerLeft {
        session_id: SessionId,
        participant_id: ParticipantId,
    },
    ReceiveMessage {
        session_id: SessionId,
        message: ChatMessage,
    },
    ShareFile {
        session_id: SessionId,
        file: FileOffer,
    },
    FileChunk {
        session_id: SessionId,
        chunk: FileChunk,
    },
    CodeUpdate {
        session_id: SessionId,
        update: CodeUpdate,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a text frame, enforcing `limit` bytes first.
pub fn decode<'a, T: Deserialize<'a>>(text: &'a str, limit: usize) -> Result<T, ProtocolError> {
    if text.len() > limit {
        return Err(ProtocolError::TooLarge {
            size: text.len(),
            limit,
        });
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
}
