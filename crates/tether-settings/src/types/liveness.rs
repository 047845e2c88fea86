//! Liveness contract announced to every connection in OPEN.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Client-driven ping/pong contract.
///
/// The client PINGs every `client_interval_ms`; the server checks every
/// `server_interval_ms` and closes the connection after `server_attempts`
/// consecutive checks without a PING.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// Server check period in milliseconds.
    pub server_interval_ms: u64,
    /// Consecutive missed checks before eviction.
    pub server_attempts: u32,
    /// Client ping period in milliseconds (must be below the server period).
    pub client_interval_ms: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            server_interval_ms: 30_000,
            server_attempts: 3,
            client_interval_ms: 25_000,
        }
    }
}

impl LivenessSettings {
    /// Server check period.
    pub fn server_interval(&self) -> Duration {
        Duration::from_millis(self.server_interval_ms)
    }

    /// Validate the contract.
    pub fn validate(&self) -> Result<()> {
        if self.server_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "liveness.serverIntervalMs",
                "must be positive",
            ));
        }
        if self.client_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "liveness.clientIntervalMs",
                "must be positive",
            ));
        }
        if self.server_attempts == 0 {
            return Err(SettingsError::invalid(
                "liveness.serverAttempts",
                "must be at least 1",
            ));
        }
        if self.client_interval_ms >= self.server_interval_ms {
            return Err(SettingsError::invalid(
                "liveness.clientIntervalMs",
                format!(
                    "{} must be below serverIntervalMs ({})",
                    self.client_interval_ms, self.server_interval_ms
                ),
            ));
        }
        Ok(())
    }
}
