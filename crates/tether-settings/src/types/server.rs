//! Listener, protocol and logging settings.

use serde::{Deserialize, Serialize};

/// Network listener and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` to auto-assign).
    pub port: u16,
    /// HTTP path that upgrades to the multiplexed WebSocket.
    pub path: String,
    /// Maximum concurrent connections across all workers.
    pub max_connections: usize,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue length; frames beyond it are dropped.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            path: "/socket".to_string(),
            max_connections: 10_000,
            max_message_size: 1024 * 1024, // 1 MiB
            outbound_buffer: 256,
        }
    }
}

/// What to do with a connection that breaks the protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationPolicy {
    /// Close the offending connection.
    #[default]
    Close,
    /// Discard the packet and keep the connection open.
    Ignore,
}

/// Protocol enforcement settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSettings {
    /// Applies to undecodable frames, JOIN/LEAVE without a topic, and
    /// server-only packet types sent by a client.
    pub violation_policy: ViolationPolicy,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter level (`RUST_LOG` takes precedence).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server() {
        let cfg = ServerSettings::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.max_connections, 10_000);
        assert_eq!(cfg.max_message_size, 1024 * 1024);
        assert_eq!(cfg.outbound_buffer, 256);
    }

    #[test]
    fn violation_policy_is_lowercase() {
        let json = serde_json::to_string(&ViolationPolicy::Ignore).unwrap();
        assert_eq!(json, "\"ignore\"");
        let back: ViolationPolicy = serde_json::from_str("\"close\"").unwrap();
        assert_eq!(back, ViolationPolicy::Close);
    }

    #[test]
    fn unknown_policy_rejected() {
        assert!(serde_json::from_str::<ViolationPolicy>("\"explode\"").is_err());
    }

    #[test]
    fn default_logging() {
        let cfg = LoggingSettings::default();
        assert_eq!(cfg.level, "info");
        assert!(!cfg.json);
    }
}
