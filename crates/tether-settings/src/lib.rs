//! # tether-settings
//!
//! Configuration with layered sources for the tether server.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **Settings file**: an explicit JSON path, deep-merged over defaults
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! The result is validated (see [`TetherSettings::validate`]) and handed to
//! the server by value. There is no process-wide settings global.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_layers, load_settings,
};
pub use types::*;
