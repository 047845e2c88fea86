//! # tetherd
//!
//! tether server binary: loads settings, registers the configured channels
//! and serves multiplexed WebSocket connections until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tether_core::logging;
use tether_server::{ChannelHandler, ChannelRegistry, EventInfo, JoinInfo, TetherServer};
use tether_settings::TetherSettings;
use tracing::{Subscriber, debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Level used while settings load, unless `--log-level` says otherwise.
const BOOTSTRAP_LOG_LEVEL: &str = "info";

/// Multiplexed WebSocket server.
#[derive(Parser, Debug)]
#[command(name = "tetherd", about = "tether connection multiplexing server")]
struct Cli {
    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Worker engines in this process (overrides settings).
    #[arg(long)]
    workers: Option<usize>,

    /// Log level (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut TetherSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(workers) = self.workers {
            settings.cluster.workers = workers;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

/// Logs membership changes and client events for the configured channels.
struct LoggingHandler;

impl ChannelHandler for LoggingHandler {
    fn on_join(&self, info: &JoinInfo<'_>) {
        debug!(conn_id = %info.conn_id, topic = info.topic, pattern = info.pattern, "joined");
    }

    fn on_leave(&self, info: &JoinInfo<'_>) {
        debug!(conn_id = %info.conn_id, topic = info.topic, pattern = info.pattern, "left");
    }

    fn on_event(&self, event: &EventInfo<'_>) {
        debug!(
            conn_id = %event.conn_id,
            topic = event.topic,
            fields = event.payload.len(),
            "event"
        );
    }
}

fn build_registry(patterns: &[String]) -> Result<ChannelRegistry> {
    let mut registry = ChannelRegistry::new();
    for pattern in patterns {
        registry
            .register(pattern, LoggingHandler)
            .with_context(|| format!("invalid channel pattern {pattern:?}"))?;
    }
    Ok(registry)
}

/// Defaults, file and environment, then flags; validated last so a flag
/// can correct a bad file value.
fn resolve_settings(cli: &Cli) -> Result<TetherSettings> {
    let mut settings =
        tether_settings::load_layers(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

/// Subscriber in force while settings load, before the configured one
/// exists.
fn bootstrap_subscriber(cli: &Cli) -> Box<dyn Subscriber + Send + Sync> {
    let level = cli.log_level.as_deref().unwrap_or(BOOTSTRAP_LOG_LEVEL);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        Box::new(builder.json().flatten_event(true).finish())
    } else {
        Box::new(builder.compact().finish())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings =
        tracing::subscriber::with_default(bootstrap_subscriber(&cli), || resolve_settings(&cli))?;

    if settings.logging.json {
        logging::init_json_subscriber(&settings.logging.level);
    } else {
        logging::init_subscriber(&settings.logging.level);
    }

    let registry = build_registry(&settings.channels)?;
    let mut server = TetherServer::new(settings, registry);
    match tether_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(error) => warn!(%error, "metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(
        "tether listening on ws://{addr}{} ({} workers)",
        server.settings().server.path,
        server.node().worker_count()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    if !server.stop(Some(handle), Some(Duration::from_secs(10))).await {
        warn!("some tasks did not stop in time");
    }
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["tetherd"]);
        let mut settings = TetherSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.cluster.workers, 1);
        assert!(!settings.logging.json);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "tetherd",
            "--host",
            "0.0.0.0",
            "--port",
            "0",
            "--workers",
            "4",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = TetherSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.cluster.workers, 4);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn settings_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 5000}, "cluster": {"workers": 2}}"#).unwrap();

        let cli = Cli::parse_from([
            "tetherd",
            "--config",
            path.to_str().unwrap(),
            "--workers",
            "3",
        ]);
        let settings = resolve_settings(&cli).unwrap();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.cluster.workers, 3);
    }

    #[test]
    fn flag_corrects_invalid_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"cluster": {"workers": 0}}"#).unwrap();
        let config = path.to_str().unwrap();

        let settings =
            resolve_settings(&Cli::parse_from(["tetherd", "--config", config, "--workers", "2"]))
                .unwrap();
        assert_eq!(settings.cluster.workers, 2);

        let err = resolve_settings(&Cli::parse_from(["tetherd", "--config", config])).unwrap_err();
        assert!(format!("{err:#}").contains("cluster.workers"));
    }

    #[test]
    fn flag_cannot_hide_other_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"path": "socket"}}"#).unwrap();
        let cli = Cli::parse_from(["tetherd", "--config", path.to_str().unwrap(), "--port", "0"]);
        assert!(resolve_settings(&cli).is_err());
    }

    #[test]
    fn bootstrap_subscriber_scopes_settings_load() {
        let cli = Cli::parse_from(["tetherd", "--log-level", "debug"]);
        let settings =
            tracing::subscriber::with_default(bootstrap_subscriber(&cli), || resolve_settings(&cli))
                .unwrap();
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn default_channels_register() {
        let registry = build_registry(&TetherSettings::default().channels).unwrap();
        assert!(registry.resolve("lobby").is_some());
        assert!(registry.resolve("room:1").is_some());
        assert!(registry.resolve("elsewhere").is_none());
    }

    #[test]
    fn overlapping_channels_rejected() {
        let patterns = vec!["room:*".to_string(), "room:1".to_string()];
        assert!(build_registry(&patterns).is_err());
    }
}
