//! Error types for ZeptoCache.
//!
//! Every variant is `Clone` so a single upstream failure can be handed,
//! unchanged, to every caller coalesced onto the same in-flight request.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the cache, the deduplicator and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The upstream call rejected. Never cached.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// The upstream call did not settle within the caller's deadline.
    #[error("Upstream timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The in-flight request was cancelled via `cancel()`.
    #[error("Request cancelled")]
    Cancelled,

    /// A key violated the fingerprint precondition (empty, control chars).
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error while reading configuration.
    #[error("I/O error: {0}")]
    Io(String),
}

impl CacheError {
    /// Whether resubmitting the same request may succeed.
    ///
    /// `Timeout` is a specialization of an upstream failure, so both count.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Upstream(_) | CacheError::Timeout(_))
    }

    /// Whether this error came from the upstream call (including timeouts).
    pub fn is_upstream(&self) -> bool {
        self.is_retryable()
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Config(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
