//! In-memory cache storage implementations.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

use super::traits::{CacheConfig, CacheError, FeedCache};
use crate::clock::SharedClock;
use crate::feed::{ContentSnapshot, Section};

/// A single cached snapshot.
#[derive(Debug, Clone)]
struct CacheEntry {
  snapshot: ContentSnapshot,
  /// Copied from `snapshot.fetched_at` when the entry is written
  stored_at: DateTime<Utc>,
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopCache;

impl FeedCache for NoopCache {
  fn get(&self, _section: Section) -> Result<Option<ContentSnapshot>, CacheError> {
    Ok(None) // Always miss
  }

  fn put(&self, _section: Section, _snapshot: ContentSnapshot) -> Result<(), CacheError> {
    Ok(()) // Discard
  }

  fn len(&self) -> Result<usize, CacheError> {
    Ok(0)
  }

  fn clear(&self) -> Result<(), CacheError> {
    Ok(())
  }
}

/// Mutex-guarded map with a time-to-live and an entry limit.
///
/// Expiry is lazy: every `get` and `put` prunes entries older than the TTL
/// before doing anything else. When a `put` pushes the map over
/// `max_entries`, the entries with the oldest `stored_at` go first.
pub struct ExpiringBoundedCache {
  entries: Mutex<HashMap<Section, CacheEntry>>,
  config: CacheConfig,
  clock: SharedClock,
}

impl ExpiringBoundedCache {
  pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      config,
      clock,
    }
  }

  pub fn config(&self) -> CacheConfig {
    self.config
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<Section, CacheEntry>>, CacheError> {
    self.entries.lock().map_err(|_| CacheError::LockPoisoned)
  }

  /// Remove entries whose age exceeds the TTL.
  fn prune_expired(&self, entries: &mut HashMap<Section, CacheEntry>) {
    let now = self.clock.now();
    let ttl = self.config.ttl;
    entries.retain(|section, entry| {
      let keep = now - entry.stored_at <= ttl;
      if !keep {
        trace!(%section, stored_at = %entry.stored_at, "expired cache entry");
      }
      keep
    });
  }

  /// Evict oldest entries until the size limit holds.
  fn prune_overflow(&self, entries: &mut HashMap<Section, CacheEntry>) {
    while entries.len() > self.config.max_entries {
      let oldest = entries
        .iter()
        .min_by_key(|(section, entry)| (entry.stored_at, **section))
        .map(|(section, _)| *section);

      match oldest {
        Some(section) => {
          trace!(%section, "evicting cache entry over capacity");
          entries.remove(&section);
        }
        None => break,
      }
    }
  }
}

impl FeedCache for ExpiringBoundedCache {
  fn get(&self, section: Section) -> Result<Option<ContentSnapshot>, CacheError> {
    let mut entries = self.lock()?;
    self.prune_expired(&mut entries);
    Ok(entries.get(&section).map(|entry| entry.snapshot.clone()))
  }

  fn put(&self, section: Section, snapshot: ContentSnapshot) -> Result<(), CacheError> {
    let mut entries = self.lock()?;
    self.prune_expired(&mut entries);

    let stored_at = snapshot.fetched_at;
    entries.insert(
      section,
      CacheEntry {
        snapshot,
        stored_at,
      },
    );

    self.prune_overflow(&mut entries);
    Ok(())
  }

  fn len(&self) -> Result<usize, CacheError> {
    let mut entries = self.lock()?;
    self.prune_expired(&mut entries);
    Ok(entries.len())
  }

  fn clear(&self) -> Result<(), CacheError> {
    self.lock()?.clear();
    Ok(())
  }
}
