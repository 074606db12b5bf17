use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`RUST_LOG` takes precedence).
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Persist warn+ records to SQLite.
    pub persist_warnings: bool,
    /// Log database path, relative to `~/.skillroom` unless absolute.
    pub db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist_warnings: false,
            db_path: "logs.db".to_string(),
        }
    }
}
