//! Client-driven liveness supervision.
//!
//! Clients PING on their own cadence; the server only counts. Every
//! `serverInterval` after the connection opened a check runs: a PING since
//! the previous check resets the miss counter, otherwise it increments. The
//! check that brings the counter to `serverAttempts` evicts the connection.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A PING arrived since the last check.
    Alive,
    /// No PING; `n` consecutive misses so far, still below the limit.
    Missed(u32),
    /// The miss limit was reached.
    Expired,
}

/// Per-connection ping bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    pinged_since_check: bool,
    missed: u32,
    last_ping: Option<Instant>,
}

impl Liveness {
    /// Fresh state: no pings, no misses.
    pub fn new() -> Self {
        Self::default()
    }

    /// A PING arrived.
    pub fn record_ping(&mut self, now: Instant) {
        self.pinged_since_check = true;
        self.missed = 0;
        self.last_ping = Some(now);
    }

    /// Run one check against the `attempts` limit.
    pub fn check(&mut self, attempts: u32) -> Verdict {
        if std::mem::take(&mut self.pinged_since_check) {
            self.missed = 0;
            return Verdict::Alive;
        }
        self.missed = self.missed.saturating_add(1);
        if self.missed >= attempts {
            Verdict::Expired
        } else {
            Verdict::Missed(self.missed)
        }
    }

    /// Consecutive missed checks.
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// When the last PING arrived.
    pub fn last_ping(&self) -> Option<Instant> {
        self.last_ping
    }
}

/// Why a liveness timer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerExit {
    /// The connection closed or the worker shut down.
    Cancelled,
    /// The worker's command queue is gone.
    WorkerGone,
}

/// Deliver a tick to `ticks` every `interval`, starting one interval from now.
///
/// Ticks are sent with backpressure so none are lost while the worker is
/// busy; delayed ticks are not bunched up.
pub async fn run_liveness_timer<T>(
    interval: Duration,
    ticks: mpsc::Sender<T>,
    make_tick: impl Fn() -> T,
    cancel: CancellationToken,
) -> TimerExit {
    let mut check = time::interval_at(Instant::now() + interval, interval);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return TimerExit::Cancelled,
            _ = check.tick() => {
                tokio::select! {
                    () = cancel.cancelled() => return TimerExit::Cancelled,
                    sent = ticks.send(make_tick()) => {
                        if sent.is_err() {
                            return TimerExit::WorkerGone;
                        }
                    }
                }
            }
        }
    }
}
