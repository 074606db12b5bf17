//! Server configuration.

use std::time::Duration;

use skillroom_settings::SkillroomSettings;

/// Runtime configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    pub heartbeat_interval: Duration,
    /// Close the connection after this long without any frame from the client.
    pub heartbeat_timeout: Duration,
    /// Max inbound frame size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before dropping.
    pub send_queue: usize,
    pub shutdown_timeout: Duration,
    /// Prior AI turns forwarded to the answer provider.
    pub max_history_turns: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 200,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_message_size: 4 * 1024 * 1024,
            send_queue: 256,
            shutdown_timeout: Duration::from_secs(10),
            max_history_turns: 20,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &SkillroomSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            max_message_size: server.max_message_size,
            send_queue: server.send_queue.max(1),
            shutdown_timeout: Duration::from_millis(server.shutdown_timeout_ms),
            max_history_turns: settings.assistant.max_history_turns,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
