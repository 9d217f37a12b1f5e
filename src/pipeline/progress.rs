//! Background progress monitor for evaluation runs.
//!
//! Periodically logs how many records have been processed and how they were
//! classified, so long runs can be followed without per-record log lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::evaluation::RecordVerdict;

/// Snapshot of progress counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub error: usize,
    /// Records currently being prepared, patched or tested.
    pub in_flight: usize,
    pub elapsed: Duration,
}

/// Shared atomic counters, cloned into workers.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    pub processed: Arc<AtomicUsize>,
    pub resolved: Arc<AtomicUsize>,
    pub unresolved: Arc<AtomicUsize>,
    pub error: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            processed: Arc::new(AtomicUsize::new(0)),
            resolved: Arc::new(AtomicUsize::new(0)),
            unresolved: Arc::new(AtomicUsize::new(0)),
            error: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Count a finished record.
    pub fn record(&self, verdict: RecordVerdict) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match verdict {
            RecordVerdict::Resolved => &self.resolved,
            RecordVerdict::Unresolved => &self.unresolved,
            RecordVerdict::Error => &self.error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that periodically logs run progress.
///
/// Call [`ProgressMonitor::stop`] to cancel; dropping it also stops the loop
/// at the next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start logging every `interval`. `total` is the number of records in
    /// the run, used for the percentage.
    pub fn start(counters: ProgressCounters, total: usize, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if total > 0 {
                    (snap.processed as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                tracing::info!(
                    processed = snap.processed,
                    total = total,
                    resolved = snap.resolved,
                    unresolved = snap.unresolved,
                    error = snap.error,
                    in_flight = snap.in_flight,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Evaluation progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the monitor to stop and wait for it.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
