//! Victim selection under capacity pressure.
//!
//! Policies are stateless: the store hands them a snapshot of candidate
//! metadata and removes whatever keys come back.

use std::cmp::Ordering;

use super::entry::{CacheEntry, Priority};

/// The metadata a policy is allowed to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VictimCandidate {
    pub key: String,
    pub priority: Priority,
    pub last_accessed_at: u64,
    pub created_at: u64,
    pub access_count: u64,
}

impl<V> From<&CacheEntry<V>> for VictimCandidate {
    fn from(entry: &CacheEntry<V>) -> Self {
        Self {
            key: entry.key.clone(),
            priority: entry.priority,
            last_accessed_at: entry.last_accessed_at,
            created_at: entry.created_at,
            access_count: entry.access_count,
        }
    }
}

/// Decides when to evict and in which order.
pub trait EvictionPolicy: Send + Sync {
    /// True when the store is at or over capacity.
    fn should_evict(&self, current_size: usize, max_size: usize) -> bool {
        current_size >= max_size
    }

    /// All candidate keys, first victim first. Must be deterministic.
    fn select_victims(&self, candidates: &[VictimCandidate]) -> Vec<String>;

    fn name(&self) -> &'static str;
}

/// Lowest priority first, then least recently accessed, then oldest.
///
/// The final tie-break on key keeps the order total when every other
/// field matches (burst inserts under a frozen clock).
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityLruPolicy;

impl PriorityLruPolicy {
    fn compare(a: &VictimCandidate, b: &VictimCandidate) -> Ordering {
        a.priority
            .cmp(&b.priority)
            .then(a.last_accessed_at.cmp(&b.last_accessed_at))
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.key.cmp(&b.key))
    }
}

impl EvictionPolicy for PriorityLruPolicy {
    fn select_victims(&self, candidates: &[VictimCandidate]) -> Vec<String> {
        let mut ordered: Vec<&VictimCandidate> = candidates.iter().collect();
        ordered.sort_by(|a, b| Self::compare(a, b));
        ordered.into_iter().map(|c| c.key.clone()).collect()
    }

    fn name(&self) -> &'static str {
        "priority-lru"
    }
}

/// Number of entries that must go so one more insert fits under `max_size`.
///
/// Never zero while at or over capacity.
pub fn victims_needed(current_size: usize, max_size: usize) -> usize {
    let max_size = max_size.max(1);
    if current_size >= max_size {
        current_size - max_size + 1
    } else {
        0
    }
}
