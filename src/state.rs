//! Circuit breaker state machine implementation.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed,

    /// Circuit is open and operations are rejected.
    Open,

    /// Circuit is allowing a limited number of operations to test recovery.
    HalfOpen,
}

impl State {
    /// Lower-case label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change, announced once the breaker lock has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: State,
    /// State after the change.
    pub to: State,
}

/// How a call was let through. The epoch ties the call to the state it was
/// admitted in, so late completions cannot drive a later half-open phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Permit {
    Normal { epoch: u64 },
    Trial { epoch: u64 },
}

/// State transitions bookkeeping. Always accessed under the breaker lock.
#[derive(Debug)]
pub(crate) struct StateManager {
    state: State,
    entered_at: Instant,
    epoch: u64,
    trials_in_flight: u32,
    trial_successes: u32,
    trips: u64,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: State::Closed,
            entered_at: Instant::now(),
            epoch: 0,
            trials_in_flight: 0,
            trial_successes: 0,
            trips: 0,
        }
    }

    pub fn current(&self) -> State {
        self.state
    }

    pub fn time_in_state(&self) -> Duration {
        self.entered_at.elapsed()
    }

    pub fn trips(&self) -> u64 {
        self.trips
    }

    pub fn trial_successes(&self) -> u32 {
        self.trial_successes
    }

    /// Moves to `to`, returning the transition unless already there.
    pub fn transition(&mut self, to: State) -> Option<Transition> {
        if self.state == to {
            return None;
        }

        let from = self.state;
        self.state = to;
        self.entered_at = Instant::now();
        self.epoch += 1;
        self.trials_in_flight = 0;
        self.trial_successes = 0;
        if to == State::Open {
            self.trips += 1;
        }

        Some(Transition { from, to })
    }

    /// Decides whether a call may proceed. An open circuit whose cool-down
    /// has elapsed moves to half-open first.
    pub fn admit(
        &mut self,
        reset_timeout: Duration,
        probe_limit: u32,
    ) -> (Option<Permit>, Option<Transition>) {
        let mut transition = None;
        if self.state == State::Open && self.time_in_state() >= reset_timeout {
            transition = self.transition(State::HalfOpen);
        }

        let permit = match self.state {
            State::Closed => Some(Permit::Normal { epoch: self.epoch }),
            State::Open => None,
            State::HalfOpen if self.trials_in_flight < probe_limit => {
                self.trials_in_flight += 1;
                Some(Permit::Trial { epoch: self.epoch })
            }
            State::HalfOpen => None,
        };

        (permit, transition)
    }

    /// Whether a normal call admitted in `epoch` may still trip the circuit.
    pub fn is_current_closed(&self, epoch: u64) -> bool {
        self.state == State::Closed && self.epoch == epoch
    }

    /// Counts a trial success; returns the consecutive success count if the
    /// trial belongs to the current half-open phase.
    pub fn trial_succeeded(&mut self, epoch: u64) -> Option<u32> {
        if self.state != State::HalfOpen || self.epoch != epoch {
            return None;
        }

        self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
        self.trial_successes += 1;
        Some(self.trial_successes)
    }

    /// A failed trial sends the circuit straight back to open.
    pub fn trial_failed(&mut self, epoch: u64) -> Option<Transition> {
        if self.state != State::HalfOpen || self.epoch != epoch {
            return None;
        }

        self.transition(State::Open)
    }

    /// Frees the slot of a trial whose caller went away before completion.
    pub fn release_trial(&mut self, epoch: u64) {
        if self.state == State::HalfOpen && self.epoch == epoch {
            self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
        }
    }
}
