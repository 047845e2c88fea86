//! Worker fan-out settings.

use serde::{Deserialize, Serialize};

/// How many worker engines run in this process and how their bus is sized.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSettings {
    /// Number of independent worker engines.
    pub workers: usize,
    /// Per-worker inbound cluster queue length.
    pub bus_capacity: usize,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ClusterSettings::default();
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.bus_capacity, 1024);
    }

    #[test]
    fn deserialize_partial() {
        let cfg: ClusterSettings = serde_json::from_str(r#"{"workers":4}"#).unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.bus_capacity, 1024);
    }
}
