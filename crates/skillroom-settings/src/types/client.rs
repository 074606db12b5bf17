use serde::{Deserialize, Serialize};

/// Participant-side settings for the room tools.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base HTTP URL of the relay server. The WebSocket URL is derived.
    pub server_url: String,
    /// Display name used when none is stored or given on the command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Give up on an AI answer after this long.
    pub ask_timeout_ms: u64,
    /// Artificial delay of the mock code runner.
    pub compile_delay_ms: u64,
    /// Extra time allowed past the compile delay before a run is failed.
    pub run_grace_ms: u64,
    /// Raw bytes per file-share chunk.
    pub file_chunk_size: usize,
    /// Largest file accepted for sharing.
    pub max_file_bytes: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4000".to_string(),
            display_name: None,
            ask_timeout_ms: 30_000,
            compile_delay_ms: 1_000,
            run_grace_ms: 5_000,
            file_chunk_size: 16 * 1024,
            max_file_bytes: 8 * 1024 * 1024,
        }
    }
}

impl ClientSettings {
    /// WebSocket endpoint for `server_url`.
    pub fn ws_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws}/ws")
    }
}
