//! Error types for the room tools.

use std::time::Duration;

use skillroom_core::{PeerId, ProtocolError};

/// Messaging-channel failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Local capture failures. All of them leave the room usable without media.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("camera or microphone permission denied")]
    PermissionDenied,
    #[error("no camera or microphone found")]
    NoDevice,
    #[error("capture failed: {0}")]
    Capture(String),
}

/// Peer-to-peer media network failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("peer id {0} is already in use")]
    IdTaken(PeerId),
    #[error("peer {0} is not reachable")]
    Unreachable(PeerId),
    #[error("peer network unavailable: {0}")]
    Unavailable(String),
}

/// Why a code run ended without output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// The program itself raised an error; the message is shown as-is.
    #[error("{0}")]
    Thrown(String),
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("runner crashed: {0}")]
    Crashed(String),
}

/// AI endpoint failures. Every variant resolves to the apology turn.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AskError {
    #[error("endpoint returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed answer: {0}")]
    Decode(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for AskError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Why a question was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AskRejected {
    #[error("question is empty")]
    Empty,
    #[error("still waiting for the previous answer")]
    Busy,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("file of {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },
    #[error("file name is empty")]
    EmptyFileName,
}

/// Top-level error for session operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("not connected to a session")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thrown_error_displays_bare_message() {
        assert_eq!(RunError::Thrown("boom".into()).to_string(), "boom");
        assert_eq!(RunError::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn protocol_errors_convert_to_transport() {
        let err: TransportError = ProtocolError::InvalidMessage("x".into()).into();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn file_too_large_message() {
        let err = ChatError::FileTooLarge { size: 10, limit: 4 };
        assert_eq!(err.to_string(), "file of 10 bytes exceeds the 4 byte limit");
    }
}
