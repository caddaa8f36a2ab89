//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use todos_resilience::prelude::*;
//! ```

pub use crate::breaker::CircuitBreaker;
pub use crate::cache::{CacheClient, MemoryCache};
pub use crate::config::ServiceConfig;
pub use crate::error::{BreakerError, CacheError, InputError};
pub use crate::model::{Identity, TodoItem};
pub use crate::service::{BreakerKind, TodoAccessService};
pub use crate::state::State;
