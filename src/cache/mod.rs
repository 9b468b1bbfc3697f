//! Feed snapshot caching.
//!
//! This module provides an in-memory snapshot cache that:
//! - Keys snapshots by section
//! - Expires entries a fixed time after their fetch timestamp
//! - Caps the number of entries, evicting the oldest first
//! - Can be swapped for any other `FeedCache` backend

mod storage;
mod traits;

pub use storage::{ExpiringBoundedCache, NoopCache};
pub use traits::{CacheConfig, CacheError, FeedCache};
