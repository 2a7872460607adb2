//! Settings types. Every struct uses `#[serde(default)]` so a partial
//! settings file only needs the keys it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatlineSettings {
    /// HTTP + WebSocket server.
    pub server: ServerSettings,
    /// Live-connection client.
    pub client: ClientSettings,
    /// AI reply backend.
    pub assistant: AssistantSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ChatlineSettings {
    /// Reject combinations that would misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutMs must not be shorter than heartbeatIntervalMs".into(),
            ));
        }
        if self.client.max_reconnect_delay_ms < self.client.reconnect_delay_ms {
            return Err(SettingsError::InvalidValue(
                "client.maxReconnectDelayMs must not be shorter than reconnectDelayMs".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Per-connection outbound queue capacity. Frames beyond it are dropped.
    pub max_send_queue: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is closed.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            max_send_queue: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ServerSettings {
    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// How the delay grows between reconnection attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Doubling delay, capped at `maxReconnectDelayMs`.
    Exponential,
}

/// Client connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// HTTP(S) base URL of the server; the WebSocket endpoint is derived from it.
    pub base_url: String,
    /// Delay before each reconnection attempt.
    pub reconnect_delay_ms: u64,
    /// Attempts before giving up with a terminal error.
    pub max_reconnect_attempts: u32,
    /// Cap for exponential backoff.
    pub max_reconnect_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffKind,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: 5,
            max_reconnect_delay_ms: 30_000,
            backoff: BackoffKind::Fixed,
        }
    }
}

/// OpenAI-compatible chat completion backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantSettings {
    /// API base URL (e.g. `https://api.openai.com/v1`). Unset disables replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model name sent with each request.
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    /// Optional system prompt prepended to every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Request timeout.
    pub timeout_ms: u64,
    /// Ask the model for title, key points, summary and tags with each reply.
    pub extract_metadata: bool,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key_env: "CHATLINE_ASSISTANT_API_KEY".to_string(),
            system_prompt: None,
            timeout_ms: 60_000,
            extract_metadata: true,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
