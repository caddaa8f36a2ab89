//! Configuration for circuit breakers and the access service.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::CircuitBreaker;
use crate::error::SettingsError;
use crate::metrics::RollingWindow;
use crate::policy::{BreakerPolicy, FailureRatePolicy};
use crate::sink::{EventSink, TracingSink};

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder<E> {
    name: String,
    timeout: Duration,
    error_threshold_percentage: f64,
    volume_threshold: u64,
    reset_timeout: Duration,
    rolling_window: Duration,
    rolling_buckets: usize,
    probe_limit: u32,
    consecutive_successes: u32,
    sink: Arc<dyn EventSink>,
    _error_type: PhantomData<fn() -> E>,
}

impl<E> BreakerBuilder<E> {
    /// Creates a new builder with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        BreakerSettings::default().builder(name)
    }

    /// Sets the per-call timeout. A call exceeding it counts as a failure.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the failure percentage that must be exceeded to trip the circuit.
    pub fn error_threshold_percentage(mut self, percentage: f64) -> Self {
        self.error_threshold_percentage = percentage;
        self
    }

    /// Sets the minimum number of calls in the window before the failure
    /// percentage is considered.
    pub fn volume_threshold(mut self, calls: u64) -> Self {
        self.volume_threshold = calls;
        self
    }

    /// Sets how long the circuit stays open before trial calls are allowed.
    pub fn reset_timeout(mut self, duration: Duration) -> Self {
        self.reset_timeout = duration;
        self
    }

    /// Sets the rolling window duration and the number of buckets it is split into.
    pub fn rolling_window(mut self, duration: Duration, buckets: usize) -> Self {
        self.rolling_window = duration;
        self.rolling_buckets = buckets;
        self
    }

    /// Sets the number of concurrent trial calls allowed while half-open.
    pub fn probe_limit(mut self, limit: u32) -> Self {
        self.probe_limit = limit;
        self
    }

    /// Sets the number of consecutive trial successes required to close.
    pub fn consecutive_successes(mut self, count: u32) -> Self {
        self.consecutive_successes = count;
        self
    }

    /// Sets the sink receiving transition events.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Builds a circuit breaker with a custom policy. The threshold settings
    /// of this builder are ignored in favour of the policy.
    pub fn build_with_policy<P: BreakerPolicy>(self, policy: P) -> CircuitBreaker<E, P> {
        CircuitBreaker::new(
            self.name,
            policy,
            self.timeout,
            self.reset_timeout,
            self.probe_limit,
            RollingWindow::new(self.rolling_window, self.rolling_buckets),
            self.sink,
        )
    }

    /// Builds a circuit breaker with the failure-rate policy.
    pub fn build(self) -> CircuitBreaker<E> {
        let policy = FailureRatePolicy::new(
            self.error_threshold_percentage,
            self.volume_threshold,
            self.consecutive_successes,
        );
        self.build_with_policy(policy)
    }
}

/// Serializable breaker settings. Durations are in milliseconds so they can
/// be overridden from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Per-call timeout.
    pub timeout_ms: u64,
    /// Failure percentage that must be exceeded to trip.
    pub error_threshold_percentage: f64,
    /// Minimum calls in the window before tripping is considered.
    pub volume_threshold: u64,
    /// Time spent open before trial calls are allowed.
    pub reset_timeout_ms: u64,
    /// Rolling window duration.
    pub rolling_window_ms: u64,
    /// Buckets in the rolling window.
    pub rolling_buckets: usize,
    /// Concurrent trial calls while half-open.
    pub probe_limit: u32,
    /// Consecutive trial successes needed to close.
    pub consecutive_successes: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            error_threshold_percentage: 60.0,
            volume_threshold: 5,
            reset_timeout_ms: 30_000,
            rolling_window_ms: 10_000,
            rolling_buckets: 10,
            probe_limit: 1,
            consecutive_successes: 1,
        }
    }
}

impl BreakerSettings {
    /// A builder preloaded with these settings.
    pub fn builder<E>(&self, name: impl Into<String>) -> BreakerBuilder<E> {
        BreakerBuilder {
            name: name.into(),
            timeout: Duration::from_millis(self.timeout_ms),
            error_threshold_percentage: self.error_threshold_percentage,
            volume_threshold: self.volume_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            rolling_window: Duration::from_millis(self.rolling_window_ms),
            rolling_buckets: self.rolling_buckets,
            probe_limit: self.probe_limit,
            consecutive_successes: self.consecutive_successes,
            sink: Arc::new(TracingSink),
            _error_type: PhantomData,
        }
    }

    /// Rejects settings the breaker cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "breaker timeout must be positive".into(),
            ));
        }
        if !(0.0..100.0).contains(&self.error_threshold_percentage) {
            return Err(SettingsError::Invalid(format!(
                "error threshold percentage {} is outside [0, 100)",
                self.error_threshold_percentage
            )));
        }
        if self.rolling_window_ms == 0 || self.rolling_buckets == 0 {
            return Err(SettingsError::Invalid(
                "rolling window needs a positive duration and at least one bucket".into(),
            ));
        }
        if self.probe_limit == 0 || self.consecutive_successes == 0 {
            return Err(SettingsError::Invalid(
                "probe limit and consecutive successes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Settings of the access service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Prefix of every cache key; the identity is appended.
    pub cache_key_prefix: String,
    /// Time-to-live of cache entries, in seconds.
    pub cache_ttl_secs: u64,
    /// Pub/sub channel audit events are published on.
    pub audit_channel: String,
    /// Maximum todo content length, in characters.
    pub max_content_len: usize,
    /// Settings shared by the read, write and publish breakers.
    pub breaker: BreakerSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_key_prefix: "todos:user:".to_string(),
            cache_ttl_secs: 3_600,
            audit_channel: "log_channel".to_string(),
            max_content_len: 1_024,
            breaker: BreakerSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Environment variable prefix, e.g. `TODOS_AUDIT_CHANNEL` or
    /// `TODOS_BREAKER__TIMEOUT_MS`.
    pub const ENV_PREFIX: &'static str = "TODOS";

    /// Loads the defaults overlaid with `TODOS_*` environment variables.
    pub fn load() -> Result<Self, SettingsError> {
        let defaults = config::Config::try_from(&ServiceConfig::default())?;
        let loaded: ServiceConfig = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Rejects settings the service cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.cache_ttl_secs == 0 {
            return Err(SettingsError::Invalid("cache TTL must be positive".into()));
        }
        if self.audit_channel.is_empty() {
            return Err(SettingsError::Invalid(
                "audit channel must not be empty".into(),
            ));
        }
        if self.max_content_len == 0 {
            return Err(SettingsError::Invalid(
                "maximum content length must be positive".into(),
            ));
        }
        self.breaker.validate()
    }

    /// Time-to-live of cache entries.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
