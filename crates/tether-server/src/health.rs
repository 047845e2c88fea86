//! `/health` response body.

use std::time::Instant;

use serde::Serialize;

/// Health check answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` while serving, `"stopping"` once shutdown began.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Admitted transport sessions.
    pub connections: usize,
    /// Worker engines in this process.
    pub workers: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    workers: usize,
    stopping: bool,
) -> HealthResponse {
    HealthResponse {
        status: if stopping { "stopping" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        workers,
    }
}
