//! Response storage: entries, fingerprints, eviction policy and the store.

pub mod entry;
pub mod eviction;
pub mod key;
pub mod store;

pub use entry::{CacheEntry, EntryOptions, Priority};
pub use eviction::{EvictionPolicy, PriorityLruPolicy, VictimCandidate};
pub use key::{fingerprint, fingerprint_with, normalize_text, validate_key};
pub use store::{CacheStore, StoreStats};
