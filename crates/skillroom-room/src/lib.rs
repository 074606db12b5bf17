//! # skillroom-room
//!
//! A participant's side of a live session. [`LiveSession`] joins a room on
//! the relay server through the [`ConnectionManager`] and drives four tools:
//!
//! - [`ChatTool`]: chat log, system notices and chunked file sharing
//! - [`CodeTool`]: shared code buffer with a mock runner
//! - [`Whiteboard`]: freehand strokes over a [`Surface`]
//! - [`AiHelpTool`]: one-at-a-time questions to the AI endpoint

#![deny(unsafe_code)]

pub mod ai_help;
pub mod chat;
pub mod code;
pub mod connection;
pub mod error;
pub mod media;
pub mod render;
pub mod room;
pub mod runner;
pub mod transport;
pub mod whiteboard;

pub use ai_help::{AiHelpTool, AskEndpoint, AskTicket, HttpAskEndpoint};
pub use chat::{ChatTool, FileShareRecord, FileStatus};
pub use code::{CodeTool, CompileResult, RunState};
pub use connection::{ConnectionHealth, ConnectionManager, JoinReport, Participant};
pub use error::{AskError, AskRejected, RoomError};
pub use media::{MediaMode, Switchboard, SyntheticDevices};
pub use render::{Color, Point, Raster, Surface};
pub use room::{LiveSession, RoomConfig, RoomDeps, RoomEvent};
pub use runner::{CodeRunner, MockRunner};
pub use transport::{Connector, WebSocketConnector};
pub use whiteboard::{Tool, Whiteboard};
