//! Core circuit breaker implementation.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::BreakerBuilder;
use crate::error::{BreakerError, BreakerResult, UpstreamError};
use crate::metrics::{Outcome, RollingWindow, WindowCounts};
use crate::policy::{BreakerPolicy, FailureRatePolicy};
use crate::sink::{CoreEvent, EventSink};
use crate::state::{Permit, State, StateManager, Transition};

/// Read-only snapshot of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: State,
    /// Counters over the rolling window.
    pub window: WindowCounts,
    /// Number of times the breaker has opened since creation.
    pub trips: u64,
    /// Consecutive successful trials in the current half-open phase.
    pub half_open_successes: u32,
    /// Milliseconds spent in the current state.
    pub in_state_for_ms: u64,
}

/// State and window, updated together in one critical section.
struct Core {
    state: StateManager,
    window: RollingWindow,
}

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner<P>
where
    P: BreakerPolicy,
{
    name: String,
    policy: P,
    timeout: Duration,
    reset_timeout: Duration,
    probe_limit: u32,
    core: Mutex<Core>,
    sink: Arc<dyn EventSink>,
}

impl<P> BreakerInner<P>
where
    P: BreakerPolicy,
{
    /// Checks if a call is allowed based on the current state.
    fn pre_call(&self) -> Option<Permit> {
        let (permit, transition) = {
            let mut core = self.core.lock();
            let admitted = core.state.admit(self.reset_timeout, self.probe_limit);
            if admitted.0.is_none() {
                core.window.record(Outcome::Rejected);
            }
            admitted
        };

        // Announce outside the lock path
        self.announce(transition);
        permit
    }

    /// Records the outcome of an admitted call and applies any transition.
    fn post_call(&self, permit: Permit, outcome: Outcome) {
        let transition = {
            let mut core = self.core.lock();
            core.window.record(outcome);

            match permit {
                Permit::Normal { epoch } => {
                    if outcome.is_failure()
                        && core.state.is_current_closed(epoch)
                        && self.policy.should_trip(&core.window.counts())
                    {
                        core.state.transition(State::Open)
                    } else {
                        None
                    }
                }
                Permit::Trial { epoch } if outcome.is_failure() => core.state.trial_failed(epoch),
                Permit::Trial { epoch } => match core.state.trial_succeeded(epoch) {
                    Some(successes) if self.policy.should_close(successes) => {
                        core.window.clear();
                        core.state.transition(State::Closed)
                    }
                    _ => None,
                },
            }
        };

        self.announce(transition);
    }

    fn force(&self, to: State) -> bool {
        let transition = {
            let mut core = self.core.lock();
            let transition = core.state.transition(to);
            if transition.is_some() && to == State::Closed {
                core.window.clear();
            }
            transition
        };

        let changed = transition.is_some();
        self.announce(transition);
        changed
    }

    fn announce(&self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            debug!(breaker = %self.name, from = %from, to = %to, "state transition");
            self.sink.record(CoreEvent::BreakerTransition {
                breaker: self.name.clone(),
                from,
                to,
            });
        }
    }
}

/// Releases a half-open trial slot if the caller goes away mid-call.
struct PermitGuard<'a, P>
where
    P: BreakerPolicy,
{
    inner: &'a BreakerInner<P>,
    permit: Option<Permit>,
}

impl<'a, P> PermitGuard<'a, P>
where
    P: BreakerPolicy,
{
    fn complete(mut self, outcome: Outcome) {
        if let Some(permit) = self.permit.take() {
            self.inner.post_call(permit, outcome);
        }
    }
}

impl<P> Drop for PermitGuard<'_, P>
where
    P: BreakerPolicy,
{
    fn drop(&mut self) {
        if let Some(Permit::Trial { epoch }) = self.permit.take() {
            self.inner.core.lock().state.release_trial(epoch);
        }
    }
}

/// A circuit breaker guarding one kind of asynchronous operation.
///
/// Every call is bounded by a timeout. Outcomes feed a rolling window; when
/// the policy says so the circuit opens and calls are rejected without being
/// attempted until the reset timeout has elapsed, after which a limited
/// number of trial calls decide whether it closes again.
pub struct CircuitBreaker<E, P = FailureRatePolicy>
where
    P: BreakerPolicy,
{
    inner: Arc<BreakerInner<P>>,
    _error_type: PhantomData<fn() -> E>,
}

impl<E> CircuitBreaker<E> {
    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder<E> {
        BreakerBuilder::new(name)
    }
}

impl<E, P> CircuitBreaker<E, P>
where
    P: BreakerPolicy,
{
    /// Creates a new circuit breaker with the specified policy and settings.
    pub fn new(
        name: impl Into<String>,
        policy: P,
        timeout: Duration,
        reset_timeout: Duration,
        probe_limit: u32,
        window: RollingWindow,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let inner = BreakerInner {
            name: name.into(),
            policy,
            timeout,
            reset_timeout,
            probe_limit: probe_limit.max(1),
            core: Mutex::new(Core {
                state: StateManager::new(),
                window,
            }),
            sink,
        };

        Self {
            inner: Arc::new(inner),
            _error_type: PhantomData,
        }
    }

    /// Name used in logs, events and health reports.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the current state of the circuit breaker.
    pub fn current_state(&self) -> State {
        self.inner.core.lock().state.current()
    }

    /// Takes a snapshot for health reporting.
    pub fn status(&self) -> BreakerStatus {
        let core = self.inner.core.lock();
        BreakerStatus {
            name: self.inner.name.clone(),
            state: core.state.current(),
            window: core.window.counts(),
            trips: core.state.trips(),
            half_open_successes: core.state.trial_successes(),
            in_state_for_ms: u64::try_from(core.state.time_in_state().as_millis())
                .unwrap_or(u64::MAX),
        }
    }

    /// Forces the circuit breaker to the open state.
    pub fn force_open(&self) -> bool {
        self.inner.force(State::Open)
    }

    /// Forces the circuit breaker to the closed state.
    pub fn force_closed(&self) -> bool {
        self.inner.force(State::Closed)
    }

    /// Resets the circuit breaker's rolling window.
    pub fn reset_stats(&self) {
        self.inner.core.lock().window.clear();
    }
}

impl<E, P> CircuitBreaker<E, P>
where
    P: BreakerPolicy,
    E: Send + 'static,
{
    /// Executes an async operation wrapped by the circuit breaker.
    ///
    /// The future returned by `f` runs on its own task. If it outlives the
    /// timeout it is left running detached and its result is discarded, so
    /// callers must not assume its side effect did not happen.
    pub async fn call<F, Fut, T>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
    {
        let Some(permit) = self.inner.pre_call() else {
            debug!(breaker = %self.inner.name, "call rejected, circuit open");
            return Err(BreakerError::Open {
                breaker: self.inner.name.clone(),
            });
        };
        let guard = PermitGuard {
            inner: self.inner.as_ref(),
            permit: Some(permit),
        };

        let handle = tokio::spawn(f());
        let result = match tokio::time::timeout(self.inner.timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(UpstreamError::Failed(err)),
            Ok(Err(join_err)) => Err(UpstreamError::Aborted(join_err.to_string())),
            Err(_) => Err(UpstreamError::TimedOut(self.inner.timeout)),
        };

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(UpstreamError::TimedOut(_)) => Outcome::Timeout,
            Err(_) => Outcome::Failure,
        };
        guard.complete(outcome);

        result.map_err(BreakerError::Upstream)
    }
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<E, P> Clone for CircuitBreaker<E, P>
where
    P: BreakerPolicy,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _error_type: PhantomData,
        }
    }
}
