//! Cache-aside access to todo lists with authoritative fallback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerStatus, CircuitBreaker};
use crate::cache::CacheClient;
use crate::config::ServiceConfig;
use crate::error::{BreakerError, CacheError, InputError};
use crate::model::{AuditEvent, Identity, OperationKind, TodoCollection, TodoItem};
use crate::sink::{CoreEvent, EventSink, TracingSink};
use crate::store::AuthoritativeStore;

/// Breaker guarding one cache operation.
pub type CacheBreaker = CircuitBreaker<CacheError>;

/// The three guarded operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerKind {
    /// Cache reads.
    CacheRead,
    /// Cache writes.
    CacheWrite,
    /// Audit publishes.
    AuditPublish,
}

impl BreakerKind {
    /// Name given to the breaker of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            BreakerKind::CacheRead => "cache-read",
            BreakerKind::CacheWrite => "cache-write",
            BreakerKind::AuditPublish => "audit-publish",
        }
    }
}

/// Access-path counters since the service was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessCounters {
    /// Cache reads, by `list` or before a mutation, that found an entry.
    pub cache_hits: u64,
    /// Cache reads that found no entry, or a stale one on `list`.
    pub cache_misses: u64,
    /// Reads that fell back to the store because the cache call failed.
    pub fallbacks: u64,
    /// Cache write-throughs that failed or were rejected.
    pub failed_cache_writes: u64,
    /// Audit publishes that failed or were rejected.
    pub failed_publishes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fallbacks: AtomicU64,
    failed_cache_writes: AtomicU64,
    failed_publishes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AccessCounters {
        AccessCounters {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            failed_cache_writes: self.failed_cache_writes.load(Ordering::Relaxed),
            failed_publishes: self.failed_publishes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the three breakers and the access counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Breaker guarding cache reads.
    pub cache_read: BreakerStatus,
    /// Breaker guarding cache writes.
    pub cache_write: BreakerStatus,
    /// Breaker guarding audit publishes.
    pub audit_publish: BreakerStatus,
    /// Access-path counters.
    pub access: AccessCounters,
}

/// Lists, creates and deletes todos.
///
/// Reads go to the cache first and fall back to the authoritative store.
/// Mutations always land in the store; refreshing the cache and publishing
/// the audit event are best effort. Cache failures never reach the caller.
pub struct TodoAccessService {
    config: ServiceConfig,
    store: Arc<AuthoritativeStore>,
    cache: Arc<dyn CacheClient>,
    read_breaker: CacheBreaker,
    write_breaker: CacheBreaker,
    publish_breaker: CacheBreaker,
    sink: Arc<dyn EventSink>,
    counters: Counters,
}

impl TodoAccessService {
    /// Creates a service with a fresh store that logs events through `tracing`.
    pub fn new(config: ServiceConfig, cache: Arc<dyn CacheClient>) -> Self {
        Self::with_components(
            config,
            cache,
            Arc::new(AuthoritativeStore::new()),
            Arc::new(TracingSink),
        )
    }

    /// Creates a service over an existing store and event sink.
    pub fn with_components(
        config: ServiceConfig,
        cache: Arc<dyn CacheClient>,
        store: Arc<AuthoritativeStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let breaker = |kind: BreakerKind| -> CacheBreaker {
            config
                .breaker
                .builder(kind.name())
                .sink(Arc::clone(&sink))
                .build()
        };
        let read_breaker = breaker(BreakerKind::CacheRead);
        let write_breaker = breaker(BreakerKind::CacheWrite);
        let publish_breaker = breaker(BreakerKind::AuditPublish);

        Self {
            config,
            store,
            cache,
            read_breaker,
            write_breaker,
            publish_breaker,
            sink,
            counters: Counters::default(),
        }
    }

    /// Service settings.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The authoritative store.
    pub fn store(&self) -> &Arc<AuthoritativeStore> {
        &self.store
    }

    /// The breaker guarding `kind`.
    pub fn breaker(&self, kind: BreakerKind) -> &CacheBreaker {
        match kind {
            BreakerKind::CacheRead => &self.read_breaker,
            BreakerKind::CacheWrite => &self.write_breaker,
            BreakerKind::AuditPublish => &self.publish_breaker,
        }
    }

    /// Breaker states, window counters and access counters.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            cache_read: self.read_breaker.status(),
            cache_write: self.write_breaker.status(),
            audit_publish: self.publish_breaker.status(),
            access: self.counters.snapshot(),
        }
    }

    /// Cache key of an identity's collection.
    pub fn cache_key(&self, identity: &Identity) -> String {
        format!("{}{}", self.config.cache_key_prefix, identity)
    }

    /// Returns the identity's todos in id order.
    pub async fn list(&self, identity: &Identity) -> Vec<TodoItem> {
        let key = self.cache_key(identity);
        let cached = self.read_cached(&key).await;

        match cached {
            Ok(Some(cached)) => {
                // A failed write-through can leave an older copy behind.
                if let Some(local) = self.store.peek(identity) {
                    if local.revision() > cached.revision() {
                        Counters::bump(&self.counters.cache_misses);
                        debug!(identity = %identity, "cached todos are stale");
                        self.refresh_cache(key, local.clone()).await;
                        return local.into_items();
                    }
                }

                Counters::bump(&self.counters.cache_hits);
                debug!(identity = %identity, "cache hit");
                cached.into_items()
            }
            Ok(None) => {
                Counters::bump(&self.counters.cache_misses);
                debug!(identity = %identity, "cache miss");
                let collection = self.store.get(identity);
                self.refresh_cache(key, collection.clone()).await;
                collection.into_items()
            }
            Err(err) => {
                Counters::bump(&self.counters.fallbacks);
                let collection = self.store.get(identity);
                if err.is_open() {
                    debug!(identity = %identity, "cache read rejected, serving from store");
                } else {
                    warn!(identity = %identity, error = %err, "cache read failed, using store");
                    self.refresh_cache(key, collection.clone()).await;
                }
                collection.into_items()
            }
        }
    }

    /// Adds a todo and returns it.
    pub async fn create(&self, identity: &Identity, content: &str) -> Result<TodoItem, InputError> {
        let content = self.validate_content(content)?;
        let key = self.cache_key(identity);
        let cached = self.read_for_mutation(identity, &key).await;

        let (item, snapshot) = self.store.update(identity, |collection| {
            collection.reconcile(cached);
            collection.insert(content)
        });
        info!(identity = %identity, todo_id = item.id, "todo created");

        let event = AuditEvent::new(OperationKind::Create, identity.clone(), item.id);
        self.propagate(key, snapshot, event).await;
        Ok(item)
    }

    /// Removes a todo. Removing an id that does not exist succeeds.
    pub async fn delete(&self, identity: &Identity, id: u64) -> Result<(), InputError> {
        if id == 0 {
            return Err(InputError::InvalidId(id));
        }
        let key = self.cache_key(identity);
        let cached = self.read_for_mutation(identity, &key).await;

        let (removed, snapshot) = self.store.update(identity, |collection| {
            collection.reconcile(cached);
            collection.remove(id)
        });
        info!(identity = %identity, todo_id = id, existed = removed.is_some(), "todo deleted");

        let event = AuditEvent::new(OperationKind::Delete, identity.clone(), id);
        self.propagate(key, snapshot, event).await;
        Ok(())
    }

    fn validate_content(&self, content: &str) -> Result<String, InputError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(InputError::EmptyContent);
        }

        let len = content.chars().count();
        let max = self.config.max_content_len;
        if len > max {
            return Err(InputError::ContentTooLong { len, max });
        }
        Ok(content.to_string())
    }

    async fn read_cached(
        &self,
        key: &str,
    ) -> Result<Option<TodoCollection>, BreakerError<CacheError>> {
        let cache = Arc::clone(&self.cache);
        let key = key.to_string();
        self.read_breaker
            .call(move || async move { cache.read(&key).await })
            .await
    }

    /// Cached copy to reconcile a mutation against, if the cache had one.
    async fn read_for_mutation(&self, identity: &Identity, key: &str) -> Option<TodoCollection> {
        match self.read_cached(key).await {
            Ok(Some(cached)) => {
                Counters::bump(&self.counters.cache_hits);
                Some(cached)
            }
            Ok(None) => {
                Counters::bump(&self.counters.cache_misses);
                None
            }
            Err(err) => {
                Counters::bump(&self.counters.fallbacks);
                if !err.is_open() {
                    warn!(identity = %identity, error = %err, "cache read failed, using store");
                }
                None
            }
        }
    }

    /// Records the audit event, then refreshes the cache and publishes the
    /// event concurrently.
    async fn propagate(&self, key: String, snapshot: TodoCollection, event: AuditEvent) {
        self.sink.record(CoreEvent::Audit(event.clone()));
        futures::join!(self.refresh_cache(key, snapshot), self.publish_audit(event));
    }

    async fn refresh_cache(&self, key: String, collection: TodoCollection) {
        let cache = Arc::clone(&self.cache);
        let ttl = self.config.cache_ttl();
        let result = self
            .write_breaker
            .call(move || async move { cache.write(&key, &collection, ttl).await })
            .await;

        if let Err(err) = result {
            Counters::bump(&self.counters.failed_cache_writes);
            if err.is_open() {
                debug!("cache write skipped, circuit open");
            } else {
                warn!(error = %err, "cache write failed");
            }
        }
    }

    async fn publish_audit(&self, event: AuditEvent) {
        let cache = Arc::clone(&self.cache);
        let channel = self.config.audit_channel.clone();
        let todo_id = event.todo_id;
        let result = self
            .publish_breaker
            .call(move || async move { cache.publish(&channel, &event).await })
            .await;

        if let Err(err) = result {
            Counters::bump(&self.counters.failed_publishes);
            if err.is_open() {
                debug!(todo_id, "audit publish skipped, circuit open");
            } else {
                warn!(todo_id, error = %err, "audit publish failed");
            }
        }
    }
}
