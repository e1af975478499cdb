//! Request coalescing — at most one upstream call per key at a time.
//!
//! The first caller for a key spawns the upstream future on the runtime and
//! registers an in-flight record; later callers for the same key append
//! themselves to its waiter list. When the call settles the record is
//! removed from the map *before* any waiter is notified, then every waiter
//! receives a clone of the same result in join order.
//!
//! Running the upstream call on its own task means a caller that gives up
//! (drops its future) never strands the others.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::key::short_key;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus};

/// A waiter is notified exactly once with the shared result.
pub type Waiter<V> = Box<dyn FnOnce(Result<V>) + Send + 'static>;

struct InFlight<V> {
    /// Distinguishes this call from a later one for the same key.
    id: u64,
    token: CancellationToken,
    waiters: Vec<Waiter<V>>,
}

/// Counters maintained by the deduplicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Upstream calls actually dispatched.
    pub upstream_calls: u64,
    /// Callers that joined an existing in-flight call.
    pub coalesced: u64,
    pub upstream_failures: u64,
    pub cancelled: u64,
}

struct Inner<V> {
    in_flight: Mutex<HashMap<String, InFlight<V>>>,
    next_id: AtomicU64,
    upstream_calls: AtomicU64,
    coalesced: AtomicU64,
    upstream_failures: AtomicU64,
    cancelled: AtomicU64,
    events: Option<EventBus>,
}

impl<V> Inner<V> {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, InFlight<V>>> {
        self.in_flight.lock().expect("in-flight map lock poisoned")
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.events {
            bus.send(event);
        }
    }
}

impl<V: Clone> Inner<V> {
    /// Complete call `id` for `key`. A no-op if that call was already
    /// cancelled or superseded.
    fn settle(&self, key: &str, id: u64, result: Result<V>) {
        let waiters = {
            let mut map = self.lock();
            match map.get(key) {
                Some(entry) if entry.id == id => map.remove(key).map(|e| e.waiters),
                _ => None,
            }
        };
        let Some(waiters) = waiters else {
            return;
        };

        if let Err(err) = &result {
            self.upstream_failures.fetch_add(1, Ordering::Relaxed);
            warn!(key = %short_key(key), error = %err, waiters = waiters.len(), "Upstream call failed");
            self.emit(CacheEvent::UpstreamFailed {
                key: short_key(key).to_string(),
                error: err.to_string(),
            });
        } else {
            debug!(key = %short_key(key), waiters = waiters.len(), "Upstream call settled");
        }

        notify_all(waiters, result);
    }
}

/// Deliver `result` to each waiter in order.
fn notify_all<V: Clone>(waiters: Vec<Waiter<V>>, result: Result<V>) {
    let mut waiters = waiters.into_iter().peekable();
    while let Some(waiter) = waiters.next() {
        if waiters.peek().is_some() {
            waiter(result.clone());
        } else {
            waiter(result);
            break;
        }
    }
}

/// Settles the call with an error if it ends without reaching `settle`:
/// the factory or the upstream task panicked, or the runtime shut down.
struct SettleGuard<V: Clone> {
    inner: Arc<Inner<V>>,
    key: String,
    id: u64,
    armed: bool,
}

impl<V: Clone> Drop for SettleGuard<V> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.settle(
                &self.key,
                self.id,
                Err(CacheError::Upstream("upstream call aborted".into())),
            );
        }
    }
}

/// Coalesces concurrent requests for the same key into one upstream call.
///
/// Cheap to clone; clones share the in-flight map.
pub struct RequestDeduplicator<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for RequestDeduplicator<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for RequestDeduplicator<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RequestDeduplicator<V> {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Publish coalescing, failure and cancellation events on `bus`.
    pub fn with_events(bus: EventBus) -> Self {
        Self::build(Some(bus))
    }

    fn build(events: Option<EventBus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                upstream_calls: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                upstream_failures: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Whether an upstream call for `key` is outstanding.
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Number of keys with an outstanding upstream call.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Waiters currently attached to `key` (0 when nothing is in flight).
    pub fn waiter_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .get(key)
            .map(|e| e.waiters.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            upstream_calls: self.inner.upstream_calls.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            upstream_failures: self.inner.upstream_failures.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone + Send + 'static> RequestDeduplicator<V> {
    /// Run `factory` for `key` unless a call is already in flight, in which
    /// case wait for that call instead. Every caller sees the same result.
    ///
    /// `factory` is only invoked by the caller that dispatches the call.
    pub async fn submit<F, Fut>(&self, key: &str, factory: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let waiter: Waiter<V> = Box::new(move |result| {
            let _ = tx.send(result);
        });

        let dispatch = {
            let mut map = self.inner.lock();
            match map.get_mut(key) {
                Some(entry) => {
                    entry.waiters.push(waiter);
                    let waiters = entry.waiters.len();
                    drop(map);
                    self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %short_key(key), waiters, "Joined in-flight request");
                    self.inner.emit(CacheEvent::Coalesced {
                        key: short_key(key).to_string(),
                        waiters,
                    });
                    None
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let token = CancellationToken::new();
                    map.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            token: token.clone(),
                            waiters: vec![waiter],
                        },
                    );
                    Some((id, token))
                }
            }
        };

        if let Some((id, token)) = dispatch {
            self.inner.upstream_calls.fetch_add(1, Ordering::Relaxed);
            debug!(key = %short_key(key), "Dispatching upstream call");
            // Armed before `factory()` runs so a panic there still frees the key.
            let guard = SettleGuard {
                inner: Arc::clone(&self.inner),
                key: key.to_string(),
                id,
                armed: true,
            };
            let upstream = factory();
            Self::spawn_upstream(guard, token, upstream);
        }

        // The sender only disappears without sending if the waiter itself
        // was dropped, which happens solely on cancellation.
        rx.await.unwrap_or(Err(CacheError::Cancelled))
    }

    /// Attach `callback` to the in-flight call for `key`.
    ///
    /// Returns `false` (and drops the callback) when nothing is in flight.
    pub fn join<C>(&self, key: &str, callback: C) -> bool
    where
        C: FnOnce(Result<V>) + Send + 'static,
    {
        let mut map = self.inner.lock();
        match map.get_mut(key) {
            Some(entry) => {
                entry.waiters.push(Box::new(callback));
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Cancel the in-flight call for `key` and reject its waiters with
    /// [`CacheError::Cancelled`]. Returns whether anything was in flight.
    pub fn cancel(&self, key: &str) -> bool {
        let Some(entry) = self.inner.lock().remove(key) else {
            return false;
        };
        entry.token.cancel();
        self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(key = %short_key(key), waiters = entry.waiters.len(), "Cancelled in-flight request");
        self.inner.emit(CacheEvent::Cancelled {
            key: short_key(key).to_string(),
            waiters: entry.waiters.len(),
        });
        notify_all(entry.waiters, Err(CacheError::Cancelled));
        true
    }

    fn spawn_upstream<Fut>(mut guard: SettleGuard<V>, token: CancellationToken, upstream: Fut)
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    // cancel() already removed the record and rejected waiters.
                    guard.armed = false;
                    return;
                }
                result = upstream => result,
            };
            guard.armed = false;
            guard.inner.settle(&guard.key, guard.id, result);
        });
    }
}

impl<V> std::fmt::Debug for RequestDeduplicator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("pending", &self.inner.lock().len())
            .finish()
    }
}

/// Enforce a deadline on an upstream future.
///
/// A lapsed deadline surfaces as [`CacheError::Timeout`]; other results pass
/// through unchanged.
pub async fn with_timeout<V, Fut>(duration: Duration, upstream: Fut) -> Result<V>
where
    Fut: Future<Output = Result<V>>,
{
    match tokio::time::timeout(duration, upstream).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_factory(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
        delay_ms: u64,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<String>> + Send>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(value.to_string())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submits_share_one_call() {
        let dedup: RequestDeduplicator<String> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let dedup = dedup.clone();
                let factory = counting_factory(&calls, "answer", 100);
                tokio::spawn(async move { dedup.submit("q", factory).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok("answer".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dedup.is_pending("q"));
        let stats = dedup.stats();
        assert_eq!(stats.upstream_calls, 1);
        assert_eq!(stats.coalesced, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_every_waiter_and_is_not_retained() {
        let dedup: RequestDeduplicator<String> = RequestDeduplicator::new();
        let first = dedup.submit("q", || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(CacheError::Upstream("provider down".into()))
        });
        let second = dedup.submit("q", || async { Ok("never".to_string()) });
        let (a, b) = tokio::join!(first, second);
        assert_eq!(a, Err(CacheError::Upstream("provider down".into())));
        assert_eq!(b, a);
        assert!(!dedup.is_pending("q"));

        // Next submit dispatches a fresh call.
        let retry = dedup.submit("q", || async { Ok("recovered".to_string()) }).await;
        assert_eq!(retry, Ok("recovered".to_string()));
        assert_eq!(dedup.stats().upstream_calls, 2);
        assert_eq!(dedup.stats().upstream_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_notified_in_join_order() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .submit("k", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(7)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(dedup.is_pending("k"));

        for i in 1..=4 {
            let order = Arc::clone(&order);
            assert!(dedup.join("k", move |result: Result<u32>| {
                order.lock().unwrap().push((i, result));
            }));
        }
        assert_eq!(dedup.waiter_count("k"), 5);

        assert_eq!(leader.await.unwrap(), Ok(7));
        let recorded = order.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![(1, Ok(7)), (2, Ok(7)), (3, Ok(7)), (4, Ok(7))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_removed_before_waiters_notified() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new();
        let seen_pending = Arc::new(Mutex::new(None));

        let leader = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .submit("k", || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let observer = dedup.clone();
        let seen = Arc::clone(&seen_pending);
        assert!(dedup.join("k", move |_| {
            *seen.lock().unwrap() = Some(observer.is_pending("k"));
        }));

        leader.await.unwrap().unwrap();
        assert_eq!(*seen_pending.lock().unwrap(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_rejects_all_waiters() {
        let dedup: RequestDeduplicator<String> = RequestDeduplicator::new();
        let a = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .submit("slow", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok("late".to_string())
                    })
                    .await
            })
        };
        let b = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .submit("slow", || async { Ok("unused".to_string()) })
                    .await
            })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(dedup.cancel("slow"));
        assert!(!dedup.is_pending("slow"));
        assert_eq!(a.await.unwrap(), Err(CacheError::Cancelled));
        assert_eq!(b.await.unwrap(), Err(CacheError::Cancelled));
        assert!(!dedup.cancel("slow"), "nothing left to cancel");
        assert_eq!(dedup.stats().cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_does_not_clobber_successor() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new();
        let first = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .submit("k", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(dedup.cancel("k"));
        assert_eq!(first.await.unwrap(), Err(CacheError::Cancelled));

        let second = dedup
            .submit("k", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(2)
            })
            .await;
        assert_eq!(second, Ok(2));
    }

    #[tokio::test]
    async fn test_join_without_in_flight() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new();
        assert!(!dedup.join("nothing", |_| {}));
        assert_eq!(dedup.waiter_count("nothing"), 0);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_do_not_coalesce() {
        let dedup: RequestDeduplicator<String> = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = tokio::join!(
            dedup.submit("a", counting_factory(&calls, "A", 10)),
            dedup.submit("b", counting_factory(&calls, "B", 10)),
        );
        assert_eq!(a, Ok("A".to_string()));
        assert_eq!(b, Ok("B".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_upstream_settles_waiters() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new();
        let result = dedup
            .submit("boom", || async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let value: Option<u32> = None;
                Ok(value.expect("upstream exploded"))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Upstream(_))));
        assert!(!dedup.is_pending("boom"));
    }

    #[tokio::test]
    async fn test_panicking_factory_releases_key() {
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::new();
        let leader = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .submit("k", || -> std::future::Ready<Result<u32>> {
                        panic!("factory exploded")
                    })
                    .await
            })
        };
        assert!(leader.await.unwrap_err().is_panic());
        assert!(!dedup.is_pending("k"));
        assert_eq!(dedup.stats().upstream_failures, 1);

        let next = tokio::time::timeout(
            Duration::from_secs(2),
            dedup.submit("k", || async { Ok(1) }),
        )
        .await
        .expect("key must not stay in flight after a factory panic");
        assert_eq!(next, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_deadline() {
        let slow = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, CacheError>(1)
        })
        .await;
        assert_eq!(slow, Err(CacheError::Timeout(Duration::from_millis(50))));

        let fast = with_timeout(Duration::from_millis(50), async { Ok::<_, CacheError>(2) }).await;
        assert_eq!(fast, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_for_coalesce_and_failure() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let dedup: RequestDeduplicator<u32> = RequestDeduplicator::with_events(bus);
        let (a, b) = tokio::join!(
            dedup.submit("k", || async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(CacheError::Upstream("nope".into()))
            }),
            dedup.submit("k", || async { Ok(0) }),
        );
        assert!(a.is_err() && b.is_err());
        assert_eq!(
            rx.recv().await.unwrap(),
            CacheEvent::Coalesced {
                key: "k".into(),
                waiters: 2
            }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::UpstreamFailed { .. }
        ));
    }
}
