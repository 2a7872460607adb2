//! Server configuration.

use std::time::Duration;

use chatline_settings::ServerSettings;
use serde::{Deserialize, Serialize};

use crate::websocket::session::SessionConfig;

/// Runtime configuration for [`crate::server::ChatServer`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Per-connection outbound queue capacity.
    pub max_send_queue: usize,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this much silence, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_send_queue: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 1024 * 1024,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_send_queue: settings.max_send_queue,
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.heartbeat_timeout_ms,
            max_message_size: settings.max_message_size,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Session tuning derived from this config.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            max_send_queue: self.max_send_queue,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_ephemeral_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn from_settings_copies_fields() {
        let settings = ServerSettings {
            port: 9090,
            max_send_queue: 8,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.max_send_queue, 8);
        assert_eq!(cfg.heartbeat_timeout_ms, 90_000);
    }

    #[test]
    fn session_config_uses_millis() {
        let cfg = ServerConfig {
            heartbeat_interval_ms: 1500,
            ..ServerConfig::default()
        };
        let session = cfg.session();
        assert_eq!(session.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(session.max_send_queue, 256);
    }
}
