//! Fire-and-forget sinks for audit events and breaker transitions.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::model::AuditEvent;
use crate::state::State;

/// An event emitted by the access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A mutation was applied to the authoritative store.
    Audit(AuditEvent),

    /// A circuit breaker changed state.
    BreakerTransition {
        /// Name of the breaker.
        breaker: String,
        /// State before the change.
        from: State,
        /// State after the change.
        to: State,
    },
}

/// Receives events from the access layer. Implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    /// Records an event.
    fn record(&self, event: CoreEvent);
}

/// Emits every event as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: CoreEvent) {
        match event {
            CoreEvent::Audit(audit) => info!(
                target: "todos_resilience::audit",
                operation = %audit.operation,
                identity = %audit.identity,
                todo_id = audit.todo_id,
                correlation_id = %audit.correlation_id,
                "audit"
            ),
            CoreEvent::BreakerTransition { breaker, from, to } if to == State::Open => warn!(
                breaker = %breaker,
                from = %from,
                "circuit breaker opened"
            ),
            CoreEvent::BreakerTransition { breaker, from, to } => info!(
                breaker = %breaker,
                from = %from,
                to = %to,
                "circuit breaker changed state"
            ),
        }
    }
}

/// A sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: CoreEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CoreEvent>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().clone()
    }

    /// Recorded audit events, oldest first.
    pub fn audits(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CoreEvent::Audit(audit) => Some(audit.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded transitions of the named breaker, as `(from, to)` pairs.
    pub fn transitions(&self, name: &str) -> Vec<(State, State)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CoreEvent::BreakerTransition { breaker, from, to } if breaker == name => {
                    Some((*from, *to))
                }
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: CoreEvent) {
        self.events.lock().push(event);
    }
}
