//! Cache-aware request orchestration.
//!
//! [`CacheOrchestrator::request`] is the only entry point callers need:
//! serve from the store when a live entry exists, otherwise coalesce onto
//! (or dispatch) the upstream call and cache its successful result.
//!
//! Per-key lifecycle:
//!
//! ```text
//! Absent --miss--> InFlight --ok--> Cached --ttl/invalidate--> Absent
//!                     |
//!                     +--err/cancel--> Absent
//! ```
//!
//! Construct one orchestrator at startup and hand clones to whatever needs
//! it; clones share the store and the in-flight map.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::cache::entry::{CacheEntry, EntryOptions, Priority};
use crate::cache::eviction::{EvictionPolicy, PriorityLruPolicy};
use crate::cache::key::{short_key, validate_key};
use crate::cache::store::{CacheStore, StoreStats};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::dedup::{DedupStats, RequestDeduplicator};
use crate::error::Result;
use crate::events::{CacheEvent, EventBus};

/// Combined store and deduplicator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub store: StoreStats,
    pub dedup: DedupStats,
}

impl OrchestratorStats {
    pub fn hit_rate(&self) -> f64 {
        self.store.hit_rate()
    }
}

/// Store + deduplicator behind a single `request()` call.
pub struct CacheOrchestrator<V> {
    store: Arc<Mutex<CacheStore<V>>>,
    dedup: RequestDeduplicator<V>,
    events: EventBus,
    default_ttl_ms: Arc<AtomicU64>,
}

impl<V> Clone for CacheOrchestrator<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dedup: self.dedup.clone(),
            events: self.events.clone(),
            default_ttl_ms: Arc::clone(&self.default_ttl_ms),
        }
    }
}

impl<V> CacheOrchestrator<V> {
    /// Build from config on the system clock.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Build from config with an injected clock.
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_parts(config, clock, Box::new(PriorityLruPolicy))
    }

    pub fn with_parts(
        config: &CacheConfig,
        clock: Arc<dyn Clock>,
        policy: Box<dyn EvictionPolicy>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let store =
            CacheStore::with_parts(config.max_entries, clock, policy).with_events(events.clone());
        Self {
            store: Arc::new(Mutex::new(store)),
            dedup: RequestDeduplicator::with_events(events.clone()),
            events,
            default_ttl_ms: Arc::new(AtomicU64::new(config.default_ttl_ms)),
        }
    }

    fn store(&self) -> MutexGuard<'_, CacheStore<V>> {
        self.store.lock().expect("cache store lock poisoned")
    }

    /// TTL applied by [`request_default`](Self::request_default).
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms.load(Ordering::Relaxed))
    }

    /// Apply a reloaded config: capacity and default TTL take effect
    /// immediately, shrinking evicts down to the new capacity. Invalid
    /// configs are rejected without changing anything.
    pub fn apply_config(&self, config: &CacheConfig) -> Result<usize> {
        config.validate()?;
        self.default_ttl_ms
            .store(config.default_ttl_ms, Ordering::Relaxed);
        let evicted = self.store().set_max_entries(config.max_entries);
        debug!(
            max_entries = config.max_entries,
            default_ttl_ms = config.default_ttl_ms,
            evicted,
            "Applied cache config"
        );
        Ok(evicted)
    }

    /// Remove every entry carrying `tag`.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.store().invalidate_tag(tag)
    }

    /// Remove the listed keys.
    pub fn invalidate_keys<I, S>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store().invalidate_keys(keys)
    }

    /// Remove every entry matching `predicate`.
    pub fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        self.store().invalidate_where(predicate)
    }

    /// Drop expired entries now. Called by the sweeper on every tick.
    pub fn sweep_expired(&self) -> usize {
        self.store().sweep_expired()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.dedup.is_pending(key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            store: self.store().stats(),
            dedup: self.dedup.stats(),
        }
    }

    /// Subscribe to cache events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}

impl<V: Clone + Send + 'static> CacheOrchestrator<V> {
    /// Cached value for `key`, if live. Counts as a lookup.
    pub fn get_cached(&self, key: &str) -> Option<V> {
        self.store().get(key).map(|e| e.value.clone())
    }

    /// Resolve `key` from cache or via `factory`.
    ///
    /// `factory` runs at most once across all concurrent callers for the
    /// same key, and only when no live entry exists. Its error reaches
    /// every coalesced caller unchanged and is never cached.
    pub async fn request<F, Fut, I, S>(
        &self,
        key: &str,
        factory: F,
        ttl: Duration,
        tags: I,
        priority: Priority,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = EntryOptions::new(ttl)
            .with_tags(tags)
            .with_priority(priority);
        self.request_with(key, factory, options).await
    }

    /// [`request`](Self::request) with the configured default TTL, no tags
    /// and medium priority.
    pub async fn request_default<F, Fut>(&self, key: &str, factory: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.request_with(key, factory, EntryOptions::new(self.default_ttl()))
            .await
    }

    pub async fn request_with<F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: EntryOptions,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        validate_key(key)?;

        if let Some(value) = self.get_cached(key) {
            debug!(key = %short_key(key), "Cache hit");
            return Ok(value);
        }

        let wrapped = read_through(Arc::clone(&self.store), key.to_string(), factory, options);
        self.dedup.submit(key, wrapped).await
    }

    /// Cancel the in-flight upstream call for `key`; all of its callers
    /// receive [`crate::CacheError::Cancelled`] and nothing is cached.
    pub fn cancel(&self, key: &str) -> bool {
        self.dedup.cancel(key)
    }

    /// Keys of live entries tagged `tag`.
    pub fn keys_tagged(&self, tag: &str) -> BTreeSet<String> {
        let store = self.store();
        store
            .keys()
            .into_iter()
            .filter(|k| store.peek(k).is_some_and(|e| e.has_tag(tag)))
            .collect()
    }
}

/// Wrap `factory` so the dispatching caller re-checks the store first and
/// stores the upstream value on success.
///
/// The re-check runs before `factory()`, so a value cached between the
/// caller's miss and its dispatch is served without touching upstream.
fn read_through<V, F, Fut>(
    store: Arc<Mutex<CacheStore<V>>>,
    key: String,
    factory: F,
    options: EntryOptions,
) -> impl FnOnce() -> BoxFuture<'static, Result<V>>
where
    V: Clone + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    move || {
        let cached = store
            .lock()
            .expect("cache store lock poisoned")
            .peek(&key)
            .map(|e| e.value.clone());
        if let Some(value) = cached {
            debug!(key = %short_key(&key), "Settled while dispatching, serving cached value");
            return future::ready(Ok(value)).boxed();
        }

        let upstream = factory();
        async move {
            let value = upstream.await?;
            store
                .lock()
                .expect("cache store lock poisoned")
                .set(key, value.clone(), &options)?;
            Ok(value)
        }
        .boxed()
    }
}

impl<V> std::fmt::Debug for CacheOrchestrator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("store", &*self.store())
            .field("dedup", &self.dedup)
            .field("default_ttl", &self.default_ttl())
            .finish()
    }
}
