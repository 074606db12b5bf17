//! # skillroom-core
//!
//! Types shared by the relay server and the client-side room:
//!
//! - branded identifiers ([`ids`])
//! - chat, file-share, code and AI-turn records ([`chat`], [`files`], [`code`], [`assist`])
//! - the tagged wire protocol spoken over the messaging channel ([`wire`])
//! - wire-level error codes ([`errors`])

#![deny(unsafe_code)]

pub mod assist;
pub mod chat;
pub mod code;
pub mod errors;
pub mod files;
pub mod ids;
pub mod wire;

pub use errors::ProtocolError;
pub use ids::{ConnectionId, FileId, MessageId, ParticipantId, PeerId, SessionId};
