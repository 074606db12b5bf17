//! Wire-level error codes and protocol decode errors.

// ── Error code constants ────────────────────────────────────────────

/// Frame could not be parsed as a known event.
pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
/// Event targets a session the sender has not joined.
pub const NOT_IN_SESSION: &str = "NOT_IN_SESSION";
/// Participant id already present in the session on another connection.
pub const IDENTITY_TAKEN: &str = "IDENTITY_TAKEN";
/// Frame exceeded the configured size limit.
pub const MESSAGE_TOO_LARGE: &str = "MESSAGE_TOO_LARGE";
/// Unexpected server-side failure.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Errors raised while encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("encode failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Wire code reported to the peer for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMessage(_) => INVALID_MESSAGE,
            Self::TooLarge { .. } => MESSAGE_TOO_LARGE,
            Self::Encode(_) => INTERNAL_ERROR,
        }
    }
}
