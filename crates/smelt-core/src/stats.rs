//! Process-wide compilation counters. Reset on restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Lock-free counters shared by every request.
#[derive(Debug)]
pub struct Stats {
    started: Instant,
    compilations: AtomicU64,
    plugins: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rate_limited: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_compilations: u64,
    pub plugins_compiled: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rate_limited: u64,
    pub uptime_seconds: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            compilations: AtomicU64::new(0),
            plugins: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
        }
    }

    /// Record one finished batch.
    pub fn record_compilation(&self, succeeded: usize, failed: usize, timed_out: usize) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
        self.plugins
            .fetch_add((succeeded + failed) as u64, Ordering::Relaxed);
        self.succeeded.fetch_add(succeeded as u64, Ordering::Relaxed);
        self.failed.fetch_add(failed as u64, Ordering::Relaxed);
        self.timed_out.fetch_add(timed_out as u64, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_compilations: self.compilations.load(Ordering::Relaxed),
            plugins_compiled: self.plugins.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
