//! In-memory response store with TTL expiry and policy-driven eviction.
//!
//! Expired entries are dropped lazily on read and in bulk by
//! [`CacheStore::sweep_expired`], which also runs before every capacity
//! check. Victims under capacity pressure come from an [`EvictionPolicy`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::entry::{CacheEntry, EntryOptions};
use super::eviction::{victims_needed, EvictionPolicy, PriorityLruPolicy, VictimCandidate};
use super::key::{short_key, validate_key};
use crate::clock::{millis, Clock, SystemClock};
use crate::error::Result;
use crate::events::{CacheEvent, EventBus};

/// Counters maintained by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Live entries at snapshot time.
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL lapsed.
    pub expired: u64,
    /// Entries dropped under capacity pressure.
    pub evicted: u64,
    /// Entries dropped by explicit invalidation.
    pub invalidated: u64,
}

impl StoreStats {
    /// hits / (hits + misses); 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Key → entry storage bounded by `max_entries`.
pub struct CacheStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    policy: Box<dyn EvictionPolicy>,
    stats: StoreStats,
    events: Option<EventBus>,
}

impl<V> CacheStore<V> {
    /// Create a store on the system clock with priority/LRU eviction.
    ///
    /// `max_entries` is clamped to a minimum of 1.
    pub fn new(max_entries: usize) -> Self {
        Self::with_parts(
            max_entries,
            Arc::new(SystemClock::new()),
            Box::new(PriorityLruPolicy),
        )
    }

    pub fn with_parts(
        max_entries: usize,
        clock: Arc<dyn Clock>,
        policy: Box<dyn EvictionPolicy>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            clock,
            policy,
            stats: StoreStats::default(),
            events: None,
        }
    }

    /// Publish store events on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Look up a live entry.
    ///
    /// On hit, bumps `access_count` and `last_accessed_at`. An expired entry
    /// is removed and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<&CacheEntry<V>> {
        debug_assert!(validate_key(key).is_ok(), "malformed cache key {key:?}");
        let now = self.clock.now_millis();
        let expired = self.entries.get(key).map(|e| e.is_expired(now));
        match expired {
            Some(true) => {
                debug!(key = %short_key(key), "Cache entry expired, removing");
                self.entries.remove(key);
                self.stats.expired += 1;
                self.stats.misses += 1;
                self.emit(CacheEvent::Expired { count: 1 });
                self.emit(CacheEvent::Miss {
                    key: short_key(key).to_string(),
                });
                None
            }
            Some(false) => {
                self.stats.hits += 1;
                self.emit(CacheEvent::Hit {
                    key: short_key(key).to_string(),
                });
                let entry = self.entries.get_mut(key)?;
                entry.touch(now);
                Some(&*entry)
            }
            None => {
                self.stats.misses += 1;
                self.emit(CacheEvent::Miss {
                    key: short_key(key).to_string(),
                });
                None
            }
        }
    }

    /// Look up a live entry without touching metadata or counters.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        let now = self.clock.now_millis();
        self.entries.get(key).filter(|e| !e.is_expired(now))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Insert or replace an entry.
    ///
    /// A new key first sweeps expired entries, then evicts policy victims
    /// until one more entry fits. Replacing an existing key never evicts.
    pub fn set(&mut self, key: impl Into<String>, value: V, options: &EntryOptions) -> Result<()> {
        let key = key.into();
        validate_key(&key)?;
        let now = self.clock.now_millis();

        if !self.entries.contains_key(&key) {
            self.sweep_expired();
            if self.policy.should_evict(self.entries.len(), self.max_entries) {
                self.evict(victims_needed(self.entries.len(), self.max_entries));
            }
        }

        let ttl_ms = millis(options.ttl);
        self.entries
            .insert(key.clone(), CacheEntry::new(key.clone(), value, now, options));
        debug!(key = %short_key(&key), ttl_ms, priority = options.priority.as_str(), "Cached entry");
        self.emit(CacheEvent::Stored {
            key: short_key(&key).to_string(),
            ttl_ms,
        });
        Ok(())
    }

    /// Remove a single key. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.invalidated += 1;
            self.emit(CacheEvent::Invalidated { count: 1 });
        }
        removed
    }

    /// Remove every entry matching `predicate`. Returns the count removed.
    pub fn invalidate_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|_, e| !predicate(e));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Invalidated cache entries");
            self.stats.invalidated += removed as u64;
            self.emit(CacheEvent::Invalidated { count: removed });
        }
        removed
    }

    /// Remove every entry carrying `tag`.
    pub fn invalidate_tag(&mut self, tag: &str) -> usize {
        self.invalidate_where(|e| e.has_tag(tag))
    }

    /// Remove the listed keys. Unknown keys are ignored.
    pub fn invalidate_keys<I, S>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key.as_ref()).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.stats.invalidated += removed as u64;
            self.emit(CacheEvent::Invalidated { count: removed });
        }
        removed
    }

    /// Remove every entry whose TTL has lapsed. Returns the count removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
            self.stats.expired += removed as u64;
            self.emit(CacheEvent::Expired { count: removed });
        }
        removed
    }

    /// Drop everything. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Change capacity, evicting policy victims if the store is now over
    /// it. Returns the number evicted.
    pub fn set_max_entries(&mut self, max_entries: usize) -> usize {
        self.max_entries = max_entries.max(1);
        self.sweep_expired();
        let excess = self.entries.len().saturating_sub(self.max_entries);
        if excess > 0 {
            self.evict(excess);
        }
        excess
    }

    /// Stored keys in unspecified order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    // -- private helpers ---------------------------------------------------

    fn evict(&mut self, count: usize) {
        let candidates: Vec<VictimCandidate> =
            self.entries.values().map(VictimCandidate::from).collect();
        let victims: Vec<String> = self
            .policy
            .select_victims(&candidates)
            .into_iter()
            .take(count)
            .collect();
        for key in &victims {
            debug!(key = %short_key(key), policy = self.policy.name(), "Evicting cache entry");
            self.entries.remove(key);
        }
        self.stats.evicted += victims.len() as u64;
        if !victims.is_empty() {
            self.emit(CacheEvent::Evicted {
                keys: victims.iter().map(|k| short_key(k).to_string()).collect(),
            });
        }
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.events {
            bus.send(event);
        }
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .field("policy", &self.policy.name())
            .finish()
    }
}
