//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields keep their compiled default.

mod cluster;
mod liveness;
mod server;

pub use cluster::*;
pub use liveness::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "server": { "port": 4100 },
///   "liveness": { "serverIntervalMs": 10000, "clientIntervalMs": 8000 },
///   "channels": ["lobby", "room:*"]
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Listener and transport settings.
    pub server: ServerSettings,
    /// Ping/pong liveness contract.
    pub liveness: LivenessSettings,
    /// Protocol violation handling.
    pub protocol: ProtocolSettings,
    /// Worker count and cluster bus sizing.
    pub cluster: ClusterSettings,
    /// Log level and format.
    pub logging: LoggingSettings,
    /// Channel patterns registered at startup (static or `prefix:*`).
    pub channels: Vec<String>,
}

impl Default for TetherSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            liveness: LivenessSettings::default(),
            protocol: ProtocolSettings::default(),
            cluster: ClusterSettings::default(),
            logging: LoggingSettings::default(),
            channels: vec!["lobby".to_string(), "room:*".to_string()],
        }
    }
}

impl TetherSettings {
    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.liveness.validate()?;
        if self.cluster.workers == 0 {
            return Err(SettingsError::invalid("cluster.workers", "must be at least 1"));
        }
        if self.cluster.bus_capacity == 0 {
            return Err(SettingsError::invalid(
                "cluster.busCapacity",
                "must be at least 1",
            ));
        }
        if self.server.outbound_buffer == 0 {
            return Err(SettingsError::invalid(
                "server.outboundBuffer",
                "must be at least 1",
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::invalid(
                "server.path",
                format!("must start with '/', got {:?}", self.server.path),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: TetherSettings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.liveness.server_attempts, 3);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(TetherSettings::default()).unwrap();
        assert!(json["server"].get("maxConnections").is_some());
        assert!(json["liveness"].get("serverIntervalMs").is_some());
        assert!(json["protocol"].get("violationPolicy").is_some());
        assert!(json["cluster"].get("busCapacity").is_some());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut settings = TetherSettings::default();
        settings.cluster.workers = 0;
        assert_matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field: "cluster.workers", .. })
        );
    }

    #[test]
    fn relative_path_rejected() {
        let mut settings = TetherSettings::default();
        settings.server.path = "socket".into();
        assert_matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field: "server.path", .. })
        );
    }

    #[test]
    fn liveness_errors_surface_through_root() {
        let mut settings = TetherSettings::default();
        settings.liveness.client_interval_ms = settings.liveness.server_interval_ms;
        assert_matches!(settings.validate(), Err(SettingsError::Invalid { .. }));
    }
}
