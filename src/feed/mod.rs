//! Feed data model shared by the cache, fetchers and pipeline.

mod section;
mod types;

pub use section::{Section, UnknownSection};
pub use types::{ContentSnapshot, FeedItem, FeedItemKind, LoadOutcome};
