//! Periodic TTL sweep.
//!
//! Expired entries are already dropped lazily on read; the sweeper bounds
//! how long unread stale entries can occupy capacity. [`Sweeper::tick`]
//! performs one sweep so any scheduler can drive it; [`spawn_sweeper`]
//! drives it from a tokio interval.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::millis;
use crate::orchestrator::CacheOrchestrator;

/// One-shot sweep driver bound to an orchestrator.
pub struct Sweeper<V> {
    cache: CacheOrchestrator<V>,
}

impl<V> Sweeper<V> {
    pub fn new(cache: CacheOrchestrator<V>) -> Self {
        Self { cache }
    }

    /// Sweep once. Returns the number of entries removed.
    pub fn tick(&self) -> usize {
        let removed = self.cache.sweep_expired();
        if removed > 0 {
            debug!(removed, "Sweeper tick");
        }
        removed
    }
}

/// Sweep every `interval` until `shutdown_rx` flips to `true`.
///
/// The returned handle resolves to the total number of entries swept.
pub fn spawn_sweeper<V: Send + 'static>(
    cache: CacheOrchestrator<V>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    let sweeper = Sweeper::new(cache);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip first immediate tick
        info!(interval_ms = millis(interval), "Cache sweeper started");

        let mut total = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    total += sweeper.tick() as u64;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!(total_swept = total, "Cache sweeper stopped");
        total
    })
}
