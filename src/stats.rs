use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

use crate::error::Result;
use crate::proto::command::{CommandKind, CommandResult, CommandStatus};

/// Executor counters, shared between callers and the send worker.
#[derive(Debug, Default)]
pub struct Stats {
    sends: AtomicU64,
    listens: AtomicU64,
    ok: AtomicU64,
    err: AtomicU64,
    timeout: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sends: u64,
    pub listens: u64,
    pub ok: u64,
    pub err: u64,
    pub timeout: u64,
    pub failed: u64,
    pub bytes: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: CommandKind, outcome: &Result<CommandResult>) {
        match kind {
            CommandKind::Send => self.sends.fetch_add(1, Ordering::Relaxed),
            CommandKind::Listen => self.listens.fetch_add(1, Ordering::Relaxed),
        };
        let counter = match outcome {
            Ok(r) => match r.status {
                CommandStatus::Success => &self.ok,
                CommandStatus::Error => &self.err,
                CommandStatus::Timeout => &self.timeout,
            },
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sends: self.sends.load(Ordering::Relaxed),
            listens: self.listens.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            err: self.err.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sends={} listens={} ok={} err={} timeout={} failed={} bytes={}",
            self.sends, self.listens, self.ok, self.err, self.timeout, self.failed, self.bytes
        )
    }
}

/// Periodic stats logging.
#[derive(Debug, Clone)]
pub struct StatsReporter {
    t0: Instant,
    last: Instant,
}

impl StatsReporter {
    pub fn new() -> Self {
        Self {
            t0: Instant::now(),
            last: Instant::now(),
        }
    }

    /// Log once `interval` seconds have passed since the last line. 0 disables.
    pub fn maybe_log(&mut self, stats: &Stats, interval: f64) -> bool {
        if interval <= 0.0 || self.last.elapsed().as_secs_f64() < interval {
            return false;
        }
        info!(
            uptime_s = self.t0.elapsed().as_secs(),
            "{}",
            stats.snapshot()
        );
        self.last = Instant::now();
        true
    }
}

impl Default for StatsReporter {
    fn default() -> Self {
        Self::new()
    }
}
