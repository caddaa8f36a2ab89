//! Shared cache abstraction and an in-process implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::model::{AuditEvent, TodoCollection};

/// The shared external cache. Every method may fail independently; callers
/// invoke each one through its own circuit breaker.
#[async_trait]
pub trait CacheClient: Send + Sync + 'static {
    /// Reads a collection. `Ok(None)` means a miss.
    async fn read(&self, key: &str) -> Result<Option<TodoCollection>, CacheError>;

    /// Stores a collection with a time-to-live.
    async fn write(
        &self,
        key: &str,
        collection: &TodoCollection,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Publishes an audit event on a channel.
    async fn publish(&self, channel: &str, event: &AuditEvent) -> Result<(), CacheError>;
}

/// Number of calls each operation has received, including failed ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCalls {
    /// Calls to `read`.
    pub reads: u64,
    /// Calls to `write`.
    pub writes: u64,
    /// Calls to `publish`.
    pub publishes: u64,
}

#[derive(Debug)]
struct Entry {
    payload: String,
    expires_at: Instant,
}

/// In-process cache holding JSON payloads with expiry, plus a log of
/// published messages.
///
/// Faults can be injected per operation, and every call can be delayed, to
/// exercise the breakers and fallbacks.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<AHashMap<String, Entry>>,
    published: Mutex<Vec<(String, String)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_publishes: AtomicBool,
    latency: Mutex<Duration>,
    reads: AtomicU64,
    writes: AtomicU64,
    publishes: AtomicU64,
}

impl MemoryCache {
    /// Creates an empty, healthy cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `read` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Makes every `write` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Makes every `publish` fail.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::Relaxed);
    }

    /// Makes every operation fail.
    pub fn fail_all(&self, fail: bool) {
        self.fail_reads(fail);
        self.fail_writes(fail);
        self.fail_publishes(fail);
    }

    /// Delays every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Stores a raw payload, bypassing serialization.
    pub fn insert_raw(&self, key: &str, payload: impl Into<String>, ttl: Duration) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                payload: payload.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// The raw payload under `key`, if present and not expired.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.live_payload(key)
    }

    /// Every `(channel, payload)` published so far, oldest first.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    /// Call counters.
    pub fn calls(&self) -> CacheCalls {
        CacheCalls {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
        }
    }

    fn live_payload(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn simulate(&self, failing: &AtomicBool, operation: &str) -> Result<(), CacheError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if failing.load(Ordering::Relaxed) {
            return Err(CacheError::Unavailable(format!(
                "injected {operation} failure"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn read(&self, key: &str) -> Result<Option<TodoCollection>, CacheError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.simulate(&self.fail_reads, "read").await?;

        match self.live_payload(key) {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn write(
        &self,
        key: &str,
        collection: &TodoCollection,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.simulate(&self.fail_writes, "write").await?;

        let payload = serde_json::to_string(collection)?;
        self.insert_raw(key, payload, ttl);
        Ok(())
    }

    async fn publish(&self, channel: &str, event: &AuditEvent) -> Result<(), CacheError> {
        self.publishes.fetch_add(1, Ordering::Relaxed);
        self.simulate(&self.fail_publishes, "publish").await?;

        let payload = serde_json::to_string(event)?;
        self.published.lock().push((channel.to_string(), payload));
        Ok(())
    }
}
