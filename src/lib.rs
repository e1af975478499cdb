//! ZeptoCache — in-process response cache with request coalescing.
//!
//! Sits between a chat front end and its LLM providers:
//!
//! - [`cache`] — entries, fingerprints, eviction policy and the TTL store
//! - [`dedup`] — at most one upstream call per key at a time
//! - [`orchestrator`] — the `request()` entry point combining both
//! - [`sweeper`] — periodic TTL sweeps
//! - [`lifecycle`] — explicit disposer registry for per-component cleanup
//! - [`events`] — broadcast of hits, misses, evictions and failures
//! - [`config`] — JSON config with hot reload
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use zeptocache::{CacheConfig, CacheOrchestrator, Priority};
//!
//! # async fn demo() -> zeptocache::Result<()> {
//! let cache: CacheOrchestrator<String> = CacheOrchestrator::from_config(&CacheConfig::default());
//! let key = zeptocache::fingerprint_with("Ce este un qubit?", [("lang", "ro")]);
//! let answer = cache
//!     .request(
//!         &key,
//!         || async { Ok("Un qubit este...".to_string()) },
//!         Duration::from_secs(300),
//!         ["faq"],
//!         Priority::High,
//!     )
//!     .await?;
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod sweeper;

pub use cache::{
    fingerprint, fingerprint_with, CacheEntry, CacheStore, EntryOptions, EvictionPolicy, Priority,
    PriorityLruPolicy, StoreStats,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{spawn_reloader, CacheConfig, ConfigWatcher};
pub use dedup::{with_timeout, DedupStats, RequestDeduplicator};
pub use error::{CacheError, Result};
pub use events::{CacheEvent, EventBus};
pub use lifecycle::{ComponentHandle, DisposerRegistry};
pub use orchestrator::{CacheOrchestrator, OrchestratorStats};
pub use sweeper::{spawn_sweeper, Sweeper};
