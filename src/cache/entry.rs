//! Cache entries and their per-entry metadata.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::millis;

/// Eviction hint. Lower priorities are evicted first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// A single cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// Normalized request fingerprint.
    pub key: String,
    /// Cached payload, opaque to the store.
    pub value: V,
    /// Clock millis when the entry was written.
    pub created_at: u64,
    /// Lifetime in millis; expired once `now > created_at + ttl_millis`.
    pub ttl_millis: u64,
    /// Labels for bulk invalidation, e.g. `user:42`.
    pub tags: BTreeSet<String>,
    pub priority: Priority,
    /// Number of hits served from this entry.
    pub access_count: u64,
    /// Clock millis of the latest hit (or of creation).
    pub last_accessed_at: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(key: String, value: V, now: u64, options: &EntryOptions) -> Self {
        Self {
            key,
            value,
            created_at: now,
            ttl_millis: millis(options.ttl),
            tags: options.tags.clone(),
            priority: options.priority,
            access_count: 0,
            last_accessed_at: now,
        }
    }

    /// Clock millis after which the entry is stale.
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.ttl_millis)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Record a hit at `now`.
    pub(crate) fn touch(&mut self, now: u64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now;
    }
}

/// Write-time parameters for an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOptions {
    pub ttl: Duration,
    pub tags: BTreeSet<String>,
    pub priority: Priority,
}

impl EntryOptions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tags: BTreeSet::new(),
            priority: Priority::default(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
