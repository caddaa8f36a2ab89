//! Failure tracking for the circuit breaker: a bucketed rolling window.

use std::time::Duration;

use serde::Serialize;
use smallvec::SmallVec;
use tokio::time::Instant;

/// Outcome of a single guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation completed successfully.
    Success,
    /// The operation returned an error.
    Failure,
    /// The operation exceeded the per-call timeout.
    Timeout,
    /// The breaker rejected the call without attempting it.
    Rejected,
}

impl Outcome {
    /// Failures and timeouts both count against the circuit.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure | Outcome::Timeout)
    }
}

/// Counters aggregated over the live part of a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    /// Calls that were attempted (successes, failures and timeouts).
    pub total: u64,
    /// Successful calls.
    pub successes: u64,
    /// Calls whose operation returned an error.
    pub failures: u64,
    /// Calls that timed out.
    pub timeouts: u64,
    /// Calls rejected by an open circuit. Not part of `total`.
    pub rejections: u64,
}

impl WindowCounts {
    /// Failures plus timeouts.
    pub fn failed(&self) -> u64 {
        self.failures + self.timeouts
    }

    /// Percentage of attempted calls that failed, `0.0` for an empty window.
    pub fn failure_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        self.failed() as f64 * 100.0 / self.total as f64
    }

    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure => self.failures += 1,
            Outcome::Timeout => self.timeouts += 1,
            Outcome::Rejected => {
                self.rejections += 1;
                return;
            }
        }
        self.total += 1;
    }

    fn merge(&mut self, other: &WindowCounts) {
        self.total += other.total;
        self.successes += other.successes;
        self.failures += other.failures;
        self.timeouts += other.timeouts;
        self.rejections += other.rejections;
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started: Instant,
    counts: WindowCounts,
}

/// A fixed-duration window split into buckets. Buckets that fall out of the
/// window are evicted as new outcomes arrive.
#[derive(Debug)]
pub struct RollingWindow {
    buckets: SmallVec<[Bucket; 16]>,
    window_size: Duration,
    bucket_size: Duration,
}

impl RollingWindow {
    /// Creates a window of `window_size` split into `bucket_count` buckets.
    pub fn new(window_size: Duration, bucket_count: usize) -> Self {
        let bucket_count = bucket_count.clamp(1, u32::MAX as usize) as u32;
        Self {
            buckets: SmallVec::new(),
            window_size,
            bucket_size: window_size / bucket_count,
        }
    }

    /// Records an outcome in the current bucket.
    pub fn record(&mut self, outcome: Outcome) {
        let now = Instant::now();
        self.evict(now);

        if let Some(bucket) = self.buckets.last_mut() {
            if now.duration_since(bucket.started) < self.bucket_size {
                bucket.counts.add(outcome);
                return;
            }
        }

        let mut counts = WindowCounts::default();
        counts.add(outcome);
        self.buckets.push(Bucket {
            started: now,
            counts,
        });
    }

    /// Aggregates the buckets still inside the window.
    pub fn counts(&self) -> WindowCounts {
        let cutoff = Instant::now().checked_sub(self.window_size);
        let mut total = WindowCounts::default();

        for bucket in &self.buckets {
            if cutoff.map_or(true, |cutoff| bucket.started >= cutoff) {
                total.merge(&bucket.counts);
            }
        }

        total
    }

    /// Drops every bucket.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    fn evict(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window_size) else {
            return;
        };

        let stale = self
            .buckets
            .iter()
            .take_while(|bucket| bucket.started < cutoff)
            .count();
        if stale > 0 {
            self.buckets.drain(..stale);
        }
    }
}
