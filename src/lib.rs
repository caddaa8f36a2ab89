//! # todos-resilience
//!
//! A resilient cache-aside access layer for per-user todo lists.
//!
//! Reads and writes go through a fast but unreliable shared cache, falling
//! back to an in-process authoritative store that never fails. Every call to
//! the cache is guarded by its own circuit breaker, so a failing dependency
//! is cut off quickly and probed again after a cool-down.
//!
//! ## The circuit breaker
//!
//! [`CircuitBreaker`] wraps an asynchronous operation and operates in three
//! states:
//!
//! - **Closed**: calls pass through. Outcomes are recorded in a bucketed
//!   rolling window; once the window holds enough calls and the failure
//!   percentage exceeds the threshold, the circuit opens.
//! - **Open**: calls are rejected immediately. After the reset timeout the
//!   next call moves the circuit to half-open.
//! - **Half-Open**: a limited number of trial calls go through. A failure
//!   re-opens the circuit; enough consecutive successes close it.
//!
//! Every call is bounded by a timeout; a call that exceeds it counts as a
//! failure and is left running in the background.
//!
//! ```rust
//! use std::time::Duration;
//! use todos_resilience::{BreakerError, CacheError, CircuitBreaker};
//!
//! # tokio_test::block_on(async {
//! let breaker = CircuitBreaker::<CacheError>::builder("cache-read")
//!     .error_threshold_percentage(50.0)
//!     .volume_threshold(10)
//!     .reset_timeout(Duration::from_secs(30))
//!     .build();
//!
//! match breaker.call(|| async { Ok::<_, CacheError>("value") }).await {
//!     Ok(value) => println!("call succeeded: {value}"),
//!     Err(BreakerError::Open { breaker }) => println!("{breaker} is open"),
//!     Err(err) => println!("call failed: {err}"),
//! }
//! # });
//! ```
//!
//! ## The access service
//!
//! [`TodoAccessService`] lists, creates and deletes todos. Only invalid
//! input ([`InputError`]) is ever returned to the caller; cache failures are
//! absorbed by falling back to the [`AuthoritativeStore`].
//!
//! ```rust
//! use std::sync::Arc;
//! use todos_resilience::{Identity, MemoryCache, ServiceConfig, TodoAccessService};
//!
//! # tokio_test::block_on(async {
//! let service = TodoAccessService::new(ServiceConfig::default(), Arc::new(MemoryCache::new()));
//! let alice = Identity::from("alice");
//!
//! let todo = service.create(&alice, "buy milk").await.unwrap();
//! assert_eq!(todo.id, 4);
//! assert_eq!(service.list(&alice).await.len(), 4);
//! # });
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod cache;
mod config;
mod error;
mod metrics;
mod model;
mod policy;
pub mod prelude;
mod service;
mod sink;
mod state;
mod store;

// Re-exports
pub use breaker::{BreakerStatus, CircuitBreaker};
pub use cache::{CacheCalls, CacheClient, MemoryCache};
pub use config::{BreakerBuilder, BreakerSettings, ServiceConfig};
pub use error::{
    BreakerError, BreakerResult, CacheError, CollectionError, InputError, SettingsError,
    UpstreamError,
};
pub use metrics::{Outcome, RollingWindow, WindowCounts};
pub use model::{MAX_ID, AuditEvent, Identity, OperationKind, TodoCollection, TodoItem};
pub use policy::{BreakerPolicy, FailureCountPolicy, FailureRatePolicy};
pub use service::{AccessCounters, BreakerKind, CacheBreaker, HealthReport, TodoAccessService};
pub use sink::{CoreEvent, EventSink, NullSink, RecordingSink, TracingSink};
pub use state::{State, Transition};
pub use store::AuthoritativeStore;
