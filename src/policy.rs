//! Policy engine for circuit breaker trip and reset decisions.

use crate::metrics::WindowCounts;

/// A policy that determines when to trip and reset a circuit breaker.
pub trait BreakerPolicy: Send + Sync + 'static {
    /// Determines if a closed circuit should trip open, given the current
    /// rolling window.
    fn should_trip(&self, counts: &WindowCounts) -> bool;

    /// Determines if a half-open circuit should close after
    /// `consecutive_successes` successful trials.
    fn should_close(&self, consecutive_successes: u32) -> bool;
}

/// Trips once the window holds at least `volume_threshold` calls and the
/// failure percentage is strictly above `error_threshold_percentage`.
#[derive(Debug, Clone)]
pub struct FailureRatePolicy {
    error_threshold_percentage: f64,
    volume_threshold: u64,
    success_threshold: u32,
}

impl FailureRatePolicy {
    /// Creates a new failure-rate policy.
    pub fn new(
        error_threshold_percentage: f64,
        volume_threshold: u64,
        success_threshold: u32,
    ) -> Self {
        Self {
            error_threshold_percentage,
            volume_threshold,
            success_threshold: success_threshold.max(1),
        }
    }
}

impl BreakerPolicy for FailureRatePolicy {
    fn should_trip(&self, counts: &WindowCounts) -> bool {
        counts.total >= self.volume_threshold
            && counts.failure_percentage() > self.error_threshold_percentage
    }

    fn should_close(&self, consecutive_successes: u32) -> bool {
        consecutive_successes >= self.success_threshold
    }
}

/// Trips once the window holds `failure_threshold` failed calls, whatever
/// the volume. For dependencies that see too little traffic for a ratio.
#[derive(Debug, Clone)]
pub struct FailureCountPolicy {
    failure_threshold: u64,
    success_threshold: u32,
}

impl FailureCountPolicy {
    /// Creates a new failure-count policy.
    pub fn new(failure_threshold: u64, success_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
        }
    }
}

impl BreakerPolicy for FailureCountPolicy {
    fn should_trip(&self, counts: &WindowCounts) -> bool {
        counts.failed() >= self.failure_threshold
    }

    fn should_close(&self, consecutive_successes: u32) -> bool {
        consecutive_successes >= self.success_threshold
    }
}
