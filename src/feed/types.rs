use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::section::Section;

/// Visual kind of a feed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedItemKind {
  Text,
  #[serde(rename_all = "camelCase")]
  Image { image_name: String },
  #[serde(rename_all = "camelCase")]
  Video {
    thumbnail_name: String,
    duration_text: String,
  },
}

/// A single story in a section feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
  pub id: String,
  pub section: Section,
  pub kind: FeedItemKind,
  pub title: String,
  #[serde(default)]
  pub subtitle: Option<String>,
  #[serde(default)]
  pub byline: Option<String>,
  #[serde(default)]
  pub timestamp_text: Option<String>,
}

/// Immutable result of one successful fetch.
///
/// `fetched_at` is the freshness timestamp; the cache measures an entry's
/// age from it, not from the time the entry was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSnapshot {
  pub items: Vec<FeedItem>,
  pub fetched_at: DateTime<Utc>,
}

impl ContentSnapshot {
  pub fn new(items: Vec<FeedItem>, fetched_at: DateTime<Utc>) -> Self {
    Self { items, fetched_at }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// One element of a load outcome stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
  /// Content is available. `is_stale` is set when it is cached data served
  /// because the fetch failed.
  Showing {
    snapshot: ContentSnapshot,
    is_stale: bool,
  },
  /// Nothing cached and the fetch failed
  Unavailable,
  /// Pipeline fault unrelated to cache or network
  Failed(String),
}

impl LoadOutcome {
  pub fn fresh(snapshot: ContentSnapshot) -> Self {
    LoadOutcome::Showing {
      snapshot,
      is_stale: false,
    }
  }

  pub fn stale(snapshot: ContentSnapshot) -> Self {
    LoadOutcome::Showing {
      snapshot,
      is_stale: true,
    }
  }

  /// Whether nothing can follow this outcome in the same stream.
  ///
  /// A non-stale `Showing` is only known to be terminal from its position,
  /// so it reports `false` here.
  pub fn is_terminal(&self) -> bool {
    match self {
      LoadOutcome::Showing { is_stale, .. } => *is_stale,
      LoadOutcome::Unavailable | LoadOutcome::Failed(_) => true,
    }
  }

  pub fn snapshot(&self) -> Option<&ContentSnapshot> {
    match self {
      LoadOutcome::Showing { snapshot, .. } => Some(snapshot),
      _ => None,
    }
  }
}
