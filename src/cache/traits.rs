//! Core traits and types for the caching system.

use chrono::Duration;
use thiserror::Error;

use crate::feed::{ContentSnapshot, Section};

/// Cache backend failures.
///
/// These never reach the presentation layer: the pipeline treats a failed
/// read as a miss and a failed write as a no-op.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
  #[error("Cache lock poisoned")]
  LockPoisoned,

  #[error("Cache backend failure: {0}")]
  Backend(String),
}

/// Trait for feed cache backends.
///
/// Implementations must serialize mutation: several pipelines share one cache
/// and may read or write different sections at the same time.
pub trait FeedCache: Send + Sync {
  /// Get the snapshot stored for `section`, skipping expired entries.
  fn get(&self, section: Section) -> Result<Option<ContentSnapshot>, CacheError>;

  /// Store `snapshot` for `section`, replacing any previous entry.
  fn put(&self, section: Section, snapshot: ContentSnapshot) -> Result<(), CacheError>;

  /// Number of live entries.
  fn len(&self) -> Result<usize, CacheError>;

  fn is_empty(&self) -> Result<bool, CacheError> {
    Ok(self.len()? == 0)
  }

  /// Drop every entry.
  fn clear(&self) -> Result<(), CacheError>;
}

/// Expiry and size limits for an in-memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
  /// Entries older than this (measured from the snapshot's fetch time) are pruned
  pub ttl: Duration,
  /// Upper bound on the number of entries kept
  pub max_entries: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl: Duration::seconds(60),
      max_entries: 10,
    }
  }
}

impl CacheConfig {
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_max_entries(mut self, max_entries: usize) -> Self {
    self.max_entries = max_entries;
    self
  }
}
