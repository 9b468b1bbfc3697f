//! Fetcher that fabricates plausible feeds without touching the network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FetchError, Fetcher};
use crate::clock::{SharedClock, SystemClock};
use crate::feed::{ContentSnapshot, FeedItem, FeedItemKind, Section};

const DEFAULT_ITEMS_PER_SECTION: usize = 60;

const BYLINES: &[&str] = &[
  "By Staff Report",
  "By Metro Desk",
  "By The Choqui Times",
  "By Sports Desk",
  "By Opinion",
];

const TIME_LABELS: &[&str] = &["5m ago", "20m ago", "1h ago", "3h ago", "Yesterday", "2d ago"];

/// Headline and subtitle pairs, reused in rotation
fn templates(section: Section) -> &'static [(&'static str, Option<&'static str>)] {
  match section {
    Section::Today => &[
      ("Markets Open Higher After Fresh Data", Some("Investors weigh rates and earnings.")),
      ("Storm System Brings Heavy Rain to the Coast", Some("Flooding possible in low-lying areas.")),
      ("City Council Advances New Housing Proposal", Some("Supporters call it overdue; critics disagree.")),
    ],
    Section::Opinion => &[
      ("We Keep Treating Symptoms Instead of Causes", Some("A case for focusing on root problems.")),
      ("The Hidden Cost of Convenience", Some("Fast delivery has a price we don't see.")),
      ("What 'Merit' Really Means in Hiring", Some("The word sounds neutral. In practice, it isn't.")),
    ],
    Section::Lifestyle => &[
      ("Your Morning Routine Might Be Too Complicated", Some("Simplify to stick with habits.")),
      ("How to Make Small Talk Less Painful", Some("Questions that lead to real conversation.")),
      ("The Case for a 'Slow Weekend'", Some("Rest isn't laziness, it's maintenance.")),
    ],
    Section::Cooking => &[
      ("One-Pan Chicken With Lemon and Herbs", Some("Bright, simple, ready in under 40 minutes.")),
      ("Three Weeknight Pastas You'll Repeat", Some("Fast sauces, pantry staples.")),
      ("A Better Way to Roast Vegetables", Some("Heat, space, and patience.")),
    ],
    Section::Sports => &[
      ("Late Goal Seals a Comeback Win", Some("A dramatic finish after a shaky first half.")),
      ("The Rookie Who Changed the Season", Some("One player unlocked the offense.")),
      ("Inside the Training of Elite Fighters", Some("Recovery, strength, and discipline.")),
    ],
    Section::ForYou | Section::Technology => &[("Story", None)],
  }
}

/// Build the deterministic item list for a section.
pub fn mock_items(section: Section, total: usize) -> Vec<FeedItem> {
  let base = templates(section);

  (0..total)
    .map(|index| {
      let (title, subtitle) = base[index % base.len()];
      let kind = if index % 5 == 4 {
        FeedItemKind::Video {
          thumbnail_name: format!("{}-thumb-{}", section.slug(), index),
          duration_text: format!("{}:{:02}", 1 + index % 9, (index * 7) % 60),
        }
      } else if index % 3 == 2 {
        FeedItemKind::Image {
          image_name: format!("{}-image-{}", section.slug(), index),
        }
      } else {
        FeedItemKind::Text
      };

      FeedItem {
        id: format!("{}-{}", section.slug(), index),
        section,
        kind,
        title: format!("{} #{}", title, index + 1),
        subtitle: subtitle.map(String::from),
        byline: Some(BYLINES[index % BYLINES.len()].to_string()),
        timestamp_text: Some(TIME_LABELS[index % TIME_LABELS.len()].to_string()),
      }
    })
    .collect()
}

/// Template-driven fetcher with simulated latency and an offline switch.
///
/// Clones share the offline flag and the call counter.
#[derive(Clone)]
pub struct MockFetcher {
  latency: Duration,
  items_per_section: usize,
  offline: Arc<AtomicBool>,
  calls: Arc<AtomicUsize>,
  clock: SharedClock,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self {
      latency: Duration::from_millis(300),
      items_per_section: DEFAULT_ITEMS_PER_SECTION,
      offline: Arc::new(AtomicBool::new(false)),
      calls: Arc::new(AtomicUsize::new(0)),
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub fn with_items_per_section(mut self, total: usize) -> Self {
    self.items_per_section = total;
    self
  }

  pub fn with_clock(mut self, clock: SharedClock) -> Self {
    self.clock = clock;
    self
  }

  /// Make every subsequent fetch fail with a transport error (or succeed again).
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn is_offline(&self) -> bool {
    self.offline.load(Ordering::SeqCst)
  }

  /// Number of fetches started so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Default for MockFetcher {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(
    &self,
    section: Section,
    cancel: &CancellationToken,
  ) -> Result<ContentSnapshot, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    tokio::select! {
      _ = cancel.cancelled() => return Err(FetchError::Cancelled),
      _ = tokio::time::sleep(self.latency) => {}
    }

    if self.is_offline() {
      debug!(%section, "mock fetcher is offline");
      return Err(FetchError::Transport("The Internet connection appears to be offline".to_string()));
    }

    Ok(ContentSnapshot::new(
      mock_items(section, self.items_per_section),
      self.clock.now(),
    ))
  }
}
