// Run metrics module
//
// Lightweight counters for what happened across the runs of a session

use crate::models::RunOutcome;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Session metrics
///
/// Uses atomic operations so the worker thread and the UI thread can both
/// record without locks. Logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Runs that reached the engine or were aborted before it
    pub runs_started: AtomicU64,

    pub runs_completed: AtomicU64,
    pub runs_aborted: AtomicU64,

    /// Events routed to a handler
    pub events_dispatched: AtomicU64,

    /// Events with no registered handler
    pub events_unhandled: AtomicU64,

    pub decode_failures: AtomicU64,
    pub engine_failures: AtomicU64,

    /// Total wall time of finished runs in milliseconds
    pub total_run_time_ms: AtomicU64,

    /// Application start time
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_aborted: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            events_unhandled: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            engine_failures: AtomicU64::new(0),
            total_run_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record whether an event found a handler
    pub fn record_event(&self, dispatched: bool) {
        if dispatched {
            self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_unhandled.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the terminal state of a run and how long it took
    pub fn record_outcome(&self, outcome: &RunOutcome, elapsed: Duration) {
        let counter = match outcome {
            RunOutcome::Completed => &self.runs_completed,
            RunOutcome::EngineFailed(_) => &self.engine_failures,
            RunOutcome::DecodeFailed(_) => &self.decode_failures,
            RunOutcome::Aborted(_) => &self.runs_aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average wall time per finished run in milliseconds
    pub fn avg_run_time_ms(&self) -> f64 {
        let finished = self.runs_completed.load(Ordering::Relaxed)
            + self.runs_aborted.load(Ordering::Relaxed)
            + self.decode_failures.load(Ordering::Relaxed)
            + self.engine_failures.load(Ordering::Relaxed);
        if finished > 0 {
            self.total_run_time_ms.load(Ordering::Relaxed) as f64 / finished as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Session Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Runs: {} started, {} completed, {} engine failures, {} decode failures, {} aborted",
            self.runs_started.load(Ordering::Relaxed),
            self.runs_completed.load(Ordering::Relaxed),
            self.engine_failures.load(Ordering::Relaxed),
            self.decode_failures.load(Ordering::Relaxed),
            self.runs_aborted.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Events: {} dispatched, {} unhandled (avg run {:.0}ms)",
            self.events_dispatched.load(Ordering::Relaxed),
            self.events_unhandled.load(Ordering::Relaxed),
            self.avg_run_time_ms()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
