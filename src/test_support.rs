//! Scripted collaborators shared by the pipeline and supervisor tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheError, FeedCache};
use crate::feed::{ContentSnapshot, FeedItem, FeedItemKind, Section};
use crate::fetch::{FetchError, Fetcher};

pub fn start() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2026, 2, 5, 9, 0, 0).unwrap()
}

pub fn snapshot(section: Section, title: &str, fetched_at: DateTime<Utc>) -> ContentSnapshot {
  ContentSnapshot::new(
    vec![FeedItem {
      id: format!("{}-0", section.slug()),
      section,
      kind: FeedItemKind::Text,
      title: title.to_string(),
      subtitle: None,
      byline: None,
      timestamp_text: None,
    }],
    fetched_at,
  )
}

/// What a scripted fetch does when it runs.
pub enum Step {
  Succeed(ContentSnapshot),
  Fail(FetchError),
  Panic(&'static str),
  /// Wait for the notify, then carry on with the inner step
  WaitThen(Arc<Notify>, Box<Step>),
}

impl Step {
  pub fn gated(gate: &Arc<Notify>, then: Step) -> Self {
    Step::WaitThen(Arc::clone(gate), Box::new(then))
  }
}

/// Fetcher that replays queued steps per section.
#[derive(Default)]
pub struct ScriptedFetcher {
  steps: Mutex<HashMap<Section, VecDeque<Step>>>,
  calls: AtomicUsize,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, section: Section, step: Step) {
    self
      .steps
      .lock()
      .unwrap()
      .entry(section)
      .or_default()
      .push_back(step);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(
    &self,
    section: Section,
    _cancel: &CancellationToken,
  ) -> Result<ContentSnapshot, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let mut step = self
      .steps
      .lock()
      .unwrap()
      .get_mut(&section)
      .and_then(|queue| queue.pop_front())
      .unwrap_or_else(|| Step::Fail(FetchError::Transport("no scripted response".to_string())));

    loop {
      step = match step {
        Step::Succeed(snapshot) => return Ok(snapshot),
        Step::Fail(err) => return Err(err),
        Step::Panic(msg) => panic!("{}", msg),
        Step::WaitThen(gate, next) => {
          gate.notified().await;
          *next
        }
      };
    }
  }
}

/// Cache wrapper that can be told to fail reads or writes.
pub struct FaultyCache<C> {
  pub inner: C,
  pub fail_get: bool,
  pub fail_put: bool,
  pub puts: AtomicUsize,
}

impl<C: FeedCache> FaultyCache<C> {
  pub fn new(inner: C) -> Self {
    Self {
      inner,
      fail_get: false,
      fail_put: false,
      puts: AtomicUsize::new(0),
    }
  }
}

impl<C: FeedCache> FeedCache for FaultyCache<C> {
  fn get(&self, section: Section) -> Result<Option<ContentSnapshot>, CacheError> {
    if self.fail_get {
      return Err(CacheError::Backend("read failed".to_string()));
    }
    self.inner.get(section)
  }

  fn put(&self, section: Section, snapshot: ContentSnapshot) -> Result<(), CacheError> {
    self.puts.fetch_add(1, Ordering::SeqCst);
    if self.fail_put {
      return Err(CacheError::Backend("write failed".to_string()));
    }
    self.inner.put(section, snapshot)
  }

  fn len(&self) -> Result<usize, CacheError> {
    self.inner.len()
  }

  fn clear(&self) -> Result<(), CacheError> {
    self.inner.clear()
  }
}
