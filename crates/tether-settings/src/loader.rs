//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge it over defaults
//! 3. Apply `TETHER_*` environment overrides
//! 4. Validate
//!
//! Callers with a further layer on top (command-line flags) use
//! [`load_layers`], apply it, then call [`TetherSettings::validate`].
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Load settings from an optional file, then apply env overrides and validate.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings(path: Option<&Path>) -> Result<TetherSettings> {
    let settings = load_layers(path)?;
    settings.validate()?;
    Ok(settings)
}

/// Defaults, file and environment merged, without validation.
pub fn load_layers(path: Option<&Path>) -> Result<TetherSettings> {
    let malformed = |origin: &str| {
        let origin = origin.to_owned();
        move |source| SettingsError::Malformed { origin, source }
    };
    let defaults =
        serde_json::to_value(TetherSettings::default()).map_err(malformed("defaults"))?;

    let (merged, origin) = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let origin = path.display().to_string();
            let user: Value = serde_json::from_str(&content).map_err(malformed(&origin))?;
            (deep_merge(defaults, user), origin)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            (defaults, "defaults".to_owned())
        }
        None => (defaults, "defaults".to_owned()),
    };

    let mut settings: TetherSettings =
        serde_json::from_value(merged).map_err(malformed(&origin))?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (an env-like key → value source).
///
/// Values that fail to parse or fall out of range are logged and ignored.
pub fn apply_overrides(settings: &mut TetherSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("TETHER_PORT").and_then(|v| parsed("TETHER_PORT", &v, 0, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = read("TETHER_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = read("TETHER_WORKERS").and_then(|v| parsed("TETHER_WORKERS", &v, 1, 1024)) {
        settings.cluster.workers = v;
    }
    if let Some(v) = read("TETHER_SERVER_INTERVAL_MS")
        .and_then(|v| parsed("TETHER_SERVER_INTERVAL_MS", &v, 10, 3_600_000))
    {
        settings.liveness.server_interval_ms = v;
    }
    if let Some(v) = read("TETHER_SERVER_ATTEMPTS")
        .and_then(|v| parsed("TETHER_SERVER_ATTEMPTS", &v, 1, 1000))
    {
        settings.liveness.server_attempts = v;
    }
    if let Some(v) = read("TETHER_CLIENT_INTERVAL_MS")
        .and_then(|v| parsed("TETHER_CLIENT_INTERVAL_MS", &v, 1, 3_600_000))
    {
        settings.liveness.client_interval_ms = v;
    }
    if let Some(v) = read("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Parse a value of any integer type within `[min, max]`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parsed<T>(key: &str, val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let result = parse_range(val, min, max);
    if result.is_none() {
        warn!(key, value = %val, "invalid numeric env var, ignoring");
    }
    result
}
