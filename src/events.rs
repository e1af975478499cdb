//! Cache event bus — broadcasts hits, misses, evictions and upstream
//! outcomes to whoever is listening (dashboards, log sinks, tests).

use serde::Serialize;
use tokio::sync::broadcast;

/// Events emitted by the store, the deduplicator and the orchestrator.
///
/// Keys are carried truncated to 8 chars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A lookup was served from the store.
    Hit { key: String },
    /// A lookup found nothing live.
    Miss { key: String },
    /// A caller joined an upstream call already in flight.
    Coalesced { key: String, waiters: usize },
    /// A successful upstream result was written.
    Stored { key: String, ttl_ms: u64 },
    /// Entries removed under capacity pressure.
    Evicted { keys: Vec<String> },
    /// Entries removed because their TTL lapsed.
    Expired { count: usize },
    /// Entries removed by explicit invalidation.
    Invalidated { count: usize },
    /// The upstream call rejected; nothing was cached.
    UpstreamFailed { key: String, error: String },
    /// An in-flight request was cancelled.
    Cancelled { key: String, waiters: usize },
}

/// Broadcast-based event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send an event to all subscribers. Silently drops if no subscribers.
    pub fn send(&self, event: CacheEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}
