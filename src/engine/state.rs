//! State owned by a running worker loop.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Where the worker loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Fetching,
    Dispatching,
    Committing,
    Draining,
    Stopped,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Fetching => "fetching",
            Phase::Dispatching => "dispatching",
            Phase::Committing => "committing",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters and timers for one worker. Owned by the loop, never shared.
#[derive(Debug)]
pub struct WorkerState {
    phase: Phase,
    processed: u64,
    started_at: Instant,
    last_heartbeat: Instant,
}

impl WorkerState {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            phase: Phase::Idle,
            processed: 0,
            started_at: now,
            last_heartbeat: now,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `to`, returning the previous phase.
    pub fn set_phase(&mut self, to: Phase) -> Phase {
        std::mem::replace(&mut self.phase, to)
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Count one item that reached a terminal record. Returns the new total.
    pub fn record_processed(&mut self) -> u64 {
        self.processed += 1;
        self.processed
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn heartbeat_due(&self, interval: Duration) -> bool {
        self.last_heartbeat.elapsed() >= interval
    }

    /// When the last heartbeat went out (loop start if none has).
    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    pub fn mark_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            processed: self.processed,
            uptime: self.uptime(),
        }
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic liveness record. Depths are `None` when the store could not be
/// asked.
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub processed: u64,
    pub queue_depth: Option<u64>,
    pub dead_letter_depth: Option<u64>,
    pub uptime: Duration,
    pub at: DateTime<Utc>,
}

/// Summary returned when the worker loop exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    pub uptime: Duration,
}
