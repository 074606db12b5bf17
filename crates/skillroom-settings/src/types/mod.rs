//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the keys it overrides.

mod assistant;
mod client;
mod logging;
mod server;

pub use assistant::*;
pub use client::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 4100 },
///   "assistant": { "provider": "mock" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillroomSettings {
    /// Relay server (HTTP + WebSocket).
    pub server: ServerSettings,
    /// AI question answering.
    pub assistant: AssistantSettings,
    /// Participant-side room tools.
    pub client: ClientSettings,
    /// Logging output and persistence.
    pub logging: LoggingSettings,
}

impl SkillroomSettings {
    /// Reject combinations that would make the room unusable.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be > 0".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutMs must be >= heartbeatIntervalMs".into(),
            ));
        }
        if self.server.send_queue == 0 {
            return Err(SettingsError::InvalidValue("server.sendQueue must be > 0".into()));
        }
        if self.client.file_chunk_size == 0 {
            return Err(SettingsError::InvalidValue(
                "client.fileChunkSize must be > 0".into(),
            ));
        }
        // Base64 inflates by 4/3; a chunk frame must fit under the server limit.
        let encoded_chunk = self.client.file_chunk_size.div_ceil(3) * 4;
        if encoded_chunk + 1024 > self.server.max_message_size {
            return Err(SettingsError::InvalidValue(format!(
                "client.fileChunkSize {} does not fit server.maxMessageSize {}",
                self.client.file_chunk_size, self.server.max_message_size
            )));
        }
        if self.assistant.max_history_turns == 0 {
            return Err(SettingsError::InvalidValue(
                "assistant.maxHistoryTurns must be > 0".into(),
            ));
        }
        Ok(())
    }
}
