//! Zoom-level progress tracking.
//!
//! The counter is the only shared mutable in-process state of a run. It is
//! owned by the scheduler, handed to the dispatcher by `Arc`, and mutated
//! exclusively through atomic increments from completion callbacks - never
//! a read-modify-write.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts terminal tile outcomes within one zoom level.
///
/// Failed tiles count as processed: the percentage tracks dispatch drain,
/// not success. `reset` is only called between zoom levels, after the drain
/// barrier, so it never races an increment.
#[derive(Debug)]
pub struct ProgressCounter {
    processed: AtomicU64,
    total: AtomicU64,
    label: &'static str,
}

impl ProgressCounter {
    /// Creates a counter. `label` is "processed" for local execution or
    /// "scheduled" for remote enqueue.
    pub fn new(label: &'static str) -> Self {
        Self {
            processed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            label,
        }
    }

    /// Rearms the counter for a zoom level of `total` tiles.
    pub fn reset(&self, total: u64) {
        self.processed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Records one terminal outcome and returns the new count.
    pub fn record(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records one terminal outcome and prints the progress line.
    pub fn record_and_report(&self) {
        let n = self.record();
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "{}", self.line(n));
        let _ = stdout.flush();
    }

    /// The carriage-return progress line for count `n`.
    pub fn line(&self, n: u64) -> String {
        let total = self.total();
        let percentage = if total == 0 {
            100.0
        } else {
            n as f64 * 100.0 / total as f64
        };
        format!("\r{:.4}% {} ({}/{})", percentage, self.label, n, total)
    }

    #[inline]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// True once every tile of the level has reached a terminal outcome.
    #[inline]
    pub fn is_complete(&self) -> bool {
        let total = self.total();
        total > 0 && self.processed() >= total
    }
}
