//! Cache configuration.
//!
//! Loaded from `~/.zeptocache/config.json`; a missing file yields defaults,
//! a malformed one is an error. Every field is optional in the file.

pub mod watcher;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, Result};

pub use watcher::{spawn_reloader, ConfigWatcher};

/// Default capacity of the response store.
pub const DEFAULT_MAX_ENTRIES: usize = 500;
/// Default entry lifetime: one hour.
pub const DEFAULT_TTL_MS: u64 = 3_600_000;
/// Default sweeper period: one minute.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
/// Default event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables for the store, the sweeper and the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum live entries; clamped to at least 1.
    pub max_entries: usize,
    /// TTL used when a caller does not pass one.
    pub default_ttl_ms: u64,
    /// How often the sweeper drops expired entries.
    pub sweep_interval_ms: u64,
    /// Broadcast capacity for cache events.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl_ms: DEFAULT_TTL_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Default config file location.
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zeptocache")
            .join("config.json")
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load and validate `path`. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str::<Self>(&data).map_err(|e| {
                CacheError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the cache unusable.
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_ms == 0 {
            return Err(CacheError::Config("default_ttl_ms must be > 0".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(CacheError::Config("sweep_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
