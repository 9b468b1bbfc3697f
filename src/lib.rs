//! Offline-first loading of section feeds.
//!
//! A [`LoadSupervisor`] drives one [`LoadPipeline`] run at a time. Each run
//! serves the cached snapshot first, then the fetched one, and falls back to
//! the cache (or to "unavailable") when the fetch fails. Requesting another
//! section cancels the run in flight and its results are never published.

pub mod cache;
pub mod clock;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod pipeline;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use cache::{CacheConfig, CacheError, ExpiringBoundedCache, FeedCache, NoopCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use feed::{ContentSnapshot, FeedItem, FeedItemKind, LoadOutcome, Section};
pub use fetch::{FetchError, Fetcher, HttpFetcher, MockFetcher};
pub use pipeline::{LoadPipeline, OutcomeStream};
pub use supervisor::{
  BannerState, ContentState, FeedView, LoadSupervisor, RequestPhase, ViewSubscription,
};
