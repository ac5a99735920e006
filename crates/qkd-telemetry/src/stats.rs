// Path: crates/qkd-telemetry/src/stats.rs
//! Per-module statistics (§4.6, §5): running totals and one-second sliding
//! rates for keys in/out, key bits in/out, disclosed bits in/out, updated
//! on every pipe read/write. Rate windows slide once per second independent
//! of worker cycles; totals are monotonic.
//!
//! The reference implementation guards this behind a recursive mutex
//! (nested calls from within a locked section); nothing in this port
//! recurses while holding the lock, so a plain [`parking_lot::Mutex`]
//! suffices.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// One of the six counters tracked per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    KeysIn,
    KeysOut,
    KeyBitsIn,
    KeyBitsOut,
    DisclosedBitsIn,
    DisclosedBitsOut,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::KeysIn,
        Metric::KeysOut,
        Metric::KeyBitsIn,
        Metric::KeyBitsOut,
        Metric::DisclosedBitsIn,
        Metric::DisclosedBitsOut,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn label(self) -> &'static str {
        match self {
            Metric::KeysIn => "keys_in",
            Metric::KeysOut => "keys_out",
            Metric::KeyBitsIn => "key_bits_in",
            Metric::KeyBitsOut => "key_bits_out",
            Metric::DisclosedBitsIn => "disclosed_bits_in",
            Metric::DisclosedBitsOut => "disclosed_bits_out",
        }
    }
}

const NUM_METRICS: usize = 6;

struct RateWindow {
    started_at: Instant,
    count_in_window: u64,
    last_rate_per_sec: f64,
}

impl RateWindow {
    fn new() -> Self {
        Self { started_at: Instant::now(), count_in_window: 0, last_rate_per_sec: 0.0 }
    }

    /// Adds `amount` to the window, rolling it over to a fresh one-second
    /// bucket if at least a second has elapsed since it started.
    fn record(&mut self, amount: u64) {
        self.roll_if_due();
        self.count_in_window += amount;
    }

    fn roll_if_due(&mut self) {
        let elapsed = self.started_at.elapsed();
        if elapsed.as_secs_f64() >= 1.0 {
            self.last_rate_per_sec = self.count_in_window as f64 / elapsed.as_secs_f64();
            self.count_in_window = 0;
            self.started_at = Instant::now();
        }
    }

    fn current_rate(&mut self) -> f64 {
        self.roll_if_due();
        self.last_rate_per_sec
    }
}

/// Running totals and sliding per-second rates for one module's six
/// counters.
pub struct Statistics {
    totals: [AtomicU64; NUM_METRICS],
    windows: Mutex<[RateWindow; NUM_METRICS]>,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            totals: std::array::from_fn(|_| AtomicU64::new(0)),
            windows: Mutex::new(std::array::from_fn(|_| RateWindow::new())),
        }
    }

    /// Adds `amount` to `metric`'s running total and current-second window.
    pub fn record(&self, metric: Metric, amount: u64) {
        self.totals[metric.index()].fetch_add(amount, Ordering::Relaxed);
        self.windows.lock()[metric.index()].record(amount);
    }

    /// Convenience: one key of `bits` bits entered via `pipe_in`.
    pub fn record_key_in(&self, bits: u64) {
        self.record(Metric::KeysIn, 1);
        self.record(Metric::KeyBitsIn, bits);
    }

    /// Convenience: one key of `bits` bits left via `pipe_out`.
    pub fn record_key_out(&self, bits: u64) {
        self.record(Metric::KeysOut, 1);
        self.record(Metric::KeyBitsOut, bits);
    }

    pub fn record_disclosed_in(&self, bits: u64) {
        self.record(Metric::DisclosedBitsIn, bits);
    }

    pub fn record_disclosed_out(&self, bits: u64) {
        self.record(Metric::DisclosedBitsOut, bits);
    }

    pub fn total(&self, metric: Metric) -> u64 {
        self.totals[metric.index()].load(Ordering::Relaxed)
    }

    /// The sliding rate per second for `metric`, as of the last completed
    /// one-second window.
    pub fn rate_per_sec(&self, metric: Metric) -> f64 {
        self.windows.lock()[metric.index()].current_rate()
    }

    /// A point-in-time snapshot of all counters, suitable for a structured
    /// log line.
    pub fn snapshot(&self) -> Vec<(&'static str, u64, f64)> {
        Metric::ALL.iter().map(|&m| (m.label(), self.total(m), self.rate_per_sec(m))).collect()
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn totals_accumulate_across_records() {
        let stats = Statistics::new();
        stats.record_key_in(8);
        stats.record_key_in(16);
        assert_eq!(stats.total(Metric::KeysIn), 2);
        assert_eq!(stats.total(Metric::KeyBitsIn), 24);
    }

    #[test]
    fn disclosed_bits_tracked_independently_of_key_bits() {
        let stats = Statistics::new();
        stats.record_key_out(32);
        stats.record_disclosed_out(4);
        assert_eq!(stats.total(Metric::KeyBitsOut), 32);
        assert_eq!(stats.total(Metric::DisclosedBitsOut), 4);
    }

    #[test]
    fn rate_window_rolls_over_after_one_second() {
        let stats = Statistics::new();
        stats.record(Metric::KeysIn, 5);
        // within the same window, the rate hasn't rolled yet.
        assert_eq!(stats.total(Metric::KeysIn), 5);
        thread::sleep(Duration::from_millis(1050));
        let rate = stats.rate_per_sec(Metric::KeysIn);
        assert!(rate > 0.0);
    }

    #[test]
    fn snapshot_reports_all_six_metrics() {
        let stats = Statistics::new();
        let snap = stats.snapshot();
        assert_eq!(snap.len(), 6);
    }
}
