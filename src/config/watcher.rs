//! Mtime-polling watcher that hot-reloads the cache config file.
//!
//! Only capacity and default TTL can change at runtime; see
//! [`crate::CacheOrchestrator::apply_config`].

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::CacheConfig;
use crate::orchestrator::CacheOrchestrator;

/// Polls a config file and emits each valid new version.
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    last_mtime: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            poll_interval,
            last_mtime: None,
        }
    }

    /// Poll until shutdown is signalled, the shutdown sender is dropped, or
    /// nobody is listening on `tx` any more.
    pub async fn watch(
        mut self,
        tx: mpsc::UnboundedSender<CacheConfig>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        self.last_mtime = read_mtime(&self.path);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the baseline mtime covers it.
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tx.closed() => break,
                _ = ticker.tick() => {
                    if let Some(config) = self.poll() {
                        if tx.send(config).is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(path = %self.path.display(), "Cache config watcher stopped");
    }

    /// Reload if the file's mtime moved since the last poll.
    ///
    /// An invalid edit is logged and skipped; its mtime is still recorded so
    /// it is not re-parsed every poll.
    fn poll(&mut self) -> Option<CacheConfig> {
        let current = read_mtime(&self.path);
        if current.is_none() || current == self.last_mtime {
            return None;
        }
        self.last_mtime = current;

        match CacheConfig::load_from_path(&self.path) {
            Ok(config) => {
                debug!(path = %self.path.display(), max_entries = config.max_entries, "Cache config file changed");
                Some(config)
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Ignoring invalid cache config edit");
                None
            }
        }
    }
}

/// Run `watcher` and apply every reloaded config to `cache` until
/// `shutdown_rx` flips to `true`.
pub fn spawn_reloader<V: Send + 'static>(
    cache: CacheOrchestrator<V>,
    watcher: ConfigWatcher,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watch_task = tokio::spawn(watcher.watch(tx, shutdown_rx));
    tokio::spawn(async move {
        while let Some(config) = rx.recv().await {
            match cache.apply_config(&config) {
                Ok(evicted) => info!(
                    max_entries = config.max_entries,
                    evicted, "Cache config reloaded"
                ),
                Err(err) => warn!(error = %err, "Reloaded cache config not applied"),
            }
        }
        let _ = watch_task.await;
    })
}

fn read_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_watcher_emits_on_change() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.json");
        std::fs::write(&cfg_path, "{}").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = ConfigWatcher::new(cfg_path.clone(), Duration::from_millis(25));
        let handle = tokio::spawn(watcher.watch(tx, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(40)).await;
        std::fs::write(&cfg_path, r#"{"max_entries": 42}"#).unwrap();

        let loaded = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.max_entries, 42);

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_reloader_applies_new_capacity() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.json");
        std::fs::write(&cfg_path, "{}").unwrap();

        let cache: CacheOrchestrator<u32> = CacheOrchestrator::from_config(&CacheConfig::default());
        for i in 0..4u32 {
            cache
                .request_default(&format!("k{i}"), move || async move { Ok(i) })
                .await
                .unwrap();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = ConfigWatcher::new(cfg_path.clone(), Duration::from_millis(25));
        let handle = spawn_reloader(cache.clone(), watcher, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(40)).await;
        std::fs::write(&cfg_path, r#"{"max_entries": 1, "default_ttl_ms": 777}"#).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while cache.len() > 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reload should shrink the cache");
        assert_eq!(cache.default_ttl(), Duration::from_millis(777));

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_watcher_exits_when_shutdown_sender_dropped() {
        let tmp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = ConfigWatcher::new(tmp.path().join("absent.json"), Duration::from_millis(10));
        let handle = tokio::spawn(watcher.watch(tx, shutdown_rx));

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("watcher should exit once the shutdown sender is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_watcher_exits_when_receiver_dropped() {
        let tmp = TempDir::new().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = ConfigWatcher::new(tmp.path().join("absent.json"), Duration::from_secs(3600));
        let handle = tokio::spawn(watcher.watch(tx, shutdown_rx));

        drop(rx);
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("watcher should exit once nobody listens")
            .unwrap();
    }

    #[test]
    fn test_poll_skips_invalid_edit_once() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.json");
        let mut watcher = ConfigWatcher::new(cfg_path.clone(), Duration::from_secs(1));
        assert!(watcher.poll().is_none(), "missing file yields nothing");

        std::fs::write(&cfg_path, r#"{"default_ttl_ms": 0}"#).unwrap();
        assert!(watcher.poll().is_none());
        assert!(watcher.last_mtime.is_some());

        watcher.last_mtime = None;
        std::fs::write(&cfg_path, r#"{"max_entries": 3}"#).unwrap();
        assert_eq!(watcher.poll().map(|c| c.max_entries), Some(3));
        assert!(watcher.poll().is_none(), "unchanged file is not re-read");
    }

    #[tokio::test]
    async fn test_watcher_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = ConfigWatcher::new(tmp.path().join("absent.json"), Duration::from_secs(3600));
        let handle = tokio::spawn(watcher.watch(tx, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("watcher should exit promptly")
            .unwrap();
    }
}
