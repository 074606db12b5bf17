//! # skillroom-server
//!
//! Relay server for live sessions. Participants connect over WebSocket at
//! `/ws`, join rooms keyed by session id, and the server relays chat, file
//! chunks and code updates to the rest of the room. It also answers
//! `POST /api/ai/ask` through an [`skillroom_assist::AnswerProvider`] and
//! reports liveness at `/health`.

#![deny(unsafe_code)]

pub mod ask;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod health;
pub mod heartbeat;
pub mod rooms;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use error::ServerError;
pub use rooms::RoomRegistry;
pub use server::{AppState, RoomServer};
pub use shutdown::ShutdownCoordinator;
