//! Cache-first load pipeline for a single section request.
//!
//! A run produces at most two outcomes, always in this order:
//!
//! 1. The cached snapshot, if one is live, marked not stale
//! 2. The terminal outcome: the fresh snapshot when the fetch succeeds,
//!    otherwise the cached snapshot marked stale, otherwise `Unavailable`
//!
//! Cache faults are absorbed (a failed read is a miss, a failed write is
//! skipped) and fetch faults become fallbacks. Only a crashed fetch task is
//! reported as `Failed`.
//!
//! # Example
//!
//! ```ignore
//! let pipeline = LoadPipeline::new(cache, fetcher);
//! let mut outcomes = pipeline.run(Section::Today, CancellationToken::new());
//!
//! while let Some(outcome) = outcomes.next().await {
//!     render(outcome);
//! }
//! ```

use futures::Stream;
use std::any::Any;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::FeedCache;
use crate::feed::{ContentSnapshot, LoadOutcome, Section};
use crate::fetch::{FetchError, Fetcher};

/// A run never emits more than two outcomes, so sends never wait.
const OUTCOME_BUFFER: usize = 2;

/// One outcome as sent by the run, tagged with whether it ends the run.
#[derive(Debug)]
struct Emission {
  outcome: LoadOutcome,
  terminal: bool,
}

/// Ordered, finite stream of outcomes for one run.
///
/// Dropping it stops the run at its next suspension point.
#[derive(Debug)]
pub struct OutcomeStream {
  rx: mpsc::Receiver<Emission>,
}

impl OutcomeStream {
  /// Receive the next outcome, or `None` once the run is over.
  pub async fn next(&mut self) -> Option<LoadOutcome> {
    self.rx.recv().await.map(|emission| emission.outcome)
  }

  /// Drain the stream and return the outcome that ended the run, if any.
  async fn terminal(mut self) -> Option<LoadOutcome> {
    while let Some(emission) = self.rx.recv().await {
      if emission.terminal {
        return Some(emission.outcome);
      }
    }
    None
  }
}

impl Stream for OutcomeStream {
  type Item = LoadOutcome;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self
      .rx
      .poll_recv(cx)
      .map(|emission| emission.map(|emission| emission.outcome))
  }
}

/// How the fetch step ended.
enum FetchStep {
  Fresh(ContentSnapshot),
  Failed(FetchError),
  Crashed(String),
  Cancelled,
}

/// Orchestrates cache reads, fetching, fallback and persistence.
#[derive(Clone)]
pub struct LoadPipeline {
  cache: Arc<dyn FeedCache>,
  fetcher: Arc<dyn Fetcher>,
}

impl LoadPipeline {
  pub fn new(cache: Arc<dyn FeedCache>, fetcher: Arc<dyn Fetcher>) -> Self {
    Self { cache, fetcher }
  }

  pub fn cache(&self) -> &Arc<dyn FeedCache> {
    &self.cache
  }

  /// Start a run for `section` on a background task.
  ///
  /// Must be called from within a Tokio runtime. Cancelling `cancel` stops
  /// the run before its next emission and before any cache write.
  pub fn run(&self, section: Section, cancel: CancellationToken) -> OutcomeStream {
    let (tx, rx) = mpsc::channel(OUTCOME_BUFFER);
    let pipeline = self.clone();

    tokio::spawn(async move {
      pipeline.drive(section, cancel, tx).await;
    });

    OutcomeStream { rx }
  }

  /// Best-effort check for a live cached snapshot.
  pub fn has_cached(&self, section: Section) -> bool {
    match self.cache.get(section) {
      Ok(cached) => cached.is_some(),
      Err(e) => {
        warn!(%section, error = %e, "cache peek failed");
        false
      }
    }
  }

  /// Run to completion and return only the terminal outcome.
  ///
  /// Returns `None` if the run was cancelled before it finished. Cancelling
  /// after the terminal outcome was delivered does not take it back.
  pub async fn load(&self, section: Section, cancel: CancellationToken) -> Option<LoadOutcome> {
    self.run(section, cancel).terminal().await
  }

  async fn drive(
    &self,
    section: Section,
    cancel: CancellationToken,
    tx: mpsc::Sender<Emission>,
  ) {
    let cached = self.read_cache(section);

    if let Some(snapshot) = &cached {
      debug!(%section, items = snapshot.len(), "emitting cached snapshot");
      if !emit(&tx, &cancel, LoadOutcome::fresh(snapshot.clone()), false).await {
        return;
      }
    }

    let terminal = match self.fetch(section, &cancel, &tx).await {
      FetchStep::Fresh(fresh) => {
        if cancel.is_cancelled() {
          return;
        }
        if let Err(e) = self.cache.put(section, fresh.clone()) {
          warn!(%section, error = %e, "failed to persist fresh snapshot");
        }
        LoadOutcome::fresh(fresh)
      }
      FetchStep::Failed(e) => match cached {
        Some(snapshot) => {
          warn!(%section, error = %e, "fetch failed, serving cached snapshot");
          LoadOutcome::stale(snapshot)
        }
        None => {
          warn!(%section, error = %e, "fetch failed with nothing cached");
          LoadOutcome::Unavailable
        }
      },
      FetchStep::Crashed(message) => LoadOutcome::Failed(message),
      FetchStep::Cancelled => {
        debug!(%section, "run cancelled during fetch");
        return;
      }
    };

    emit(&tx, &cancel, terminal, true).await;
  }

  fn read_cache(&self, section: Section) -> Option<ContentSnapshot> {
    match self.cache.get(section) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(%section, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Fetch on its own task so a panicking fetcher can't take the run down
  /// with it, racing it against cancellation and the consumer going away.
  async fn fetch(
    &self,
    section: Section,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<Emission>,
  ) -> FetchStep {
    let fetcher = Arc::clone(&self.fetcher);
    let token = cancel.clone();
    let mut task = tokio::spawn(async move { fetcher.fetch(section, &token).await });

    let joined = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        task.abort();
        return FetchStep::Cancelled;
      }
      _ = tx.closed() => {
        task.abort();
        return FetchStep::Cancelled;
      }
      joined = &mut task => joined,
    };

    match joined {
      Ok(Ok(snapshot)) => FetchStep::Fresh(snapshot),
      Ok(Err(e)) => FetchStep::Failed(e),
      Err(e) if e.is_panic() => {
        let message = format!(
          "Loading {} failed unexpectedly: {}",
          section,
          panic_message(e.into_panic())
        );
        warn!(%section, %message, "fetch task panicked");
        FetchStep::Crashed(message)
      }
      Err(_) => FetchStep::Cancelled,
    }
  }
}

/// Send unless cancelled. Returns `false` when the run should stop.
async fn emit(
  tx: &mpsc::Sender<Emission>,
  cancel: &CancellationToken,
  outcome: LoadOutcome,
  terminal: bool,
) -> bool {
  if cancel.is_cancelled() {
    return false;
  }
  tx.send(Emission { outcome, terminal }).await.is_ok()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheConfig, ExpiringBoundedCache, NoopCache};
  use crate::clock::{Clock, ManualClock};
  use crate::test_support::{snapshot, start, FaultyCache, ScriptedFetcher, Step};
  use chrono::Duration;
  use futures::StreamExt;
  use std::sync::atomic::Ordering;
  use std::time::Duration as StdDuration;
  use tokio::sync::Notify;

  struct Harness {
    clock: ManualClock,
    cache: Arc<ExpiringBoundedCache>,
    fetcher: Arc<ScriptedFetcher>,
    pipeline: LoadPipeline,
  }

  fn harness() -> Harness {
    let clock = ManualClock::new(start());
    let cache = Arc::new(ExpiringBoundedCache::new(
      CacheConfig::default(),
      Arc::new(clock.clone()),
    ));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let pipeline = LoadPipeline::new(cache.clone(), fetcher.clone());
    Harness {
      clock,
      cache,
      fetcher,
      pipeline,
    }
  }

  async fn collect(stream: OutcomeStream) -> Vec<LoadOutcome> {
    tokio::time::timeout(StdDuration::from_secs(5), stream.collect::<Vec<_>>())
      .await
      .expect("pipeline run should finish")
  }

  fn transport_error() -> FetchError {
    FetchError::Transport("offline".to_string())
  }

  #[tokio::test]
  async fn test_empty_cache_fetch_succeeds() {
    let h = harness();
    let s1 = snapshot(Section::Today, "S1", h.clock.now());
    h.fetcher.push(Section::Today, Step::Succeed(s1.clone()));

    let outcomes = collect(h.pipeline.run(Section::Today, CancellationToken::new())).await;

    assert_eq!(outcomes, vec![LoadOutcome::fresh(s1.clone())]);
    assert_eq!(h.cache.get(Section::Today).unwrap(), Some(s1));
  }

  #[tokio::test]
  async fn test_cached_then_fresh() {
    let h = harness();
    let old = snapshot(Section::Today, "old", h.clock.now() - Duration::seconds(10));
    let new = snapshot(Section::Today, "new", h.clock.now());
    h.cache.put(Section::Today, old.clone()).unwrap();
    h.fetcher.push(Section::Today, Step::Succeed(new.clone()));

    let outcomes = collect(h.pipeline.run(Section::Today, CancellationToken::new())).await;

    assert_eq!(
      outcomes,
      vec![LoadOutcome::fresh(old), LoadOutcome::fresh(new.clone())]
    );
    assert_eq!(h.cache.get(Section::Today).unwrap(), Some(new));
  }

  #[tokio::test]
  async fn test_cached_and_fetch_fails_falls_back_stale() {
    let h = harness();
    let s1 = snapshot(Section::Today, "S1", h.clock.now() - Duration::seconds(10));
    h.cache.put(Section::Today, s1.clone()).unwrap();
    h.fetcher.push(Section::Today, Step::Fail(transport_error()));

    let outcomes = collect(h.pipeline.run(Section::Today, CancellationToken::new())).await;

    assert_eq!(
      outcomes,
      vec![LoadOutcome::fresh(s1.clone()), LoadOutcome::stale(s1)]
    );
  }

  #[tokio::test]
  async fn test_expired_cache_and_fetch_fails_is_unavailable() {
    let h = harness();
    let s1 = snapshot(Section::Today, "S1", h.clock.now());
    h.cache.put(Section::Today, s1).unwrap();
    h.clock.advance(Duration::seconds(70));
    h.fetcher.push(Section::Today, Step::Fail(transport_error()));

    let outcomes = collect(h.pipeline.run(Section::Today, CancellationToken::new())).await;

    assert_eq!(outcomes, vec![LoadOutcome::Unavailable]);
  }

  #[tokio::test]
  async fn test_every_fetch_error_kind_falls_back() {
    let errors = [
      FetchError::InvalidResponse("garbage".to_string()),
      FetchError::UnacceptableStatus(500),
      FetchError::Transport("reset".to_string()),
      FetchError::Cancelled,
      FetchError::Unknown("?".to_string()),
    ];

    for err in errors {
      let h = harness();
      let s1 = snapshot(Section::Sports, "S1", h.clock.now());
      h.cache.put(Section::Sports, s1.clone()).unwrap();
      h.fetcher.push(Section::Sports, Step::Fail(err.clone()));

      let terminal = h
        .pipeline
        .load(Section::Sports, CancellationToken::new())
        .await;

      assert_eq!(terminal, Some(LoadOutcome::stale(s1)), "error {err:?}");
    }
  }

  #[tokio::test]
  async fn test_cache_read_fault_is_a_miss() {
    let clock = ManualClock::new(start());
    let mut faulty = FaultyCache::new(ExpiringBoundedCache::new(
      CacheConfig::default(),
      Arc::new(clock.clone()),
    ));
    faulty
      .inner
      .put(Section::Today, snapshot(Section::Today, "S1", clock.now()))
      .unwrap();
    faulty.fail_get = true;

    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.push(Section::Today, Step::Fail(transport_error()));
    let pipeline = LoadPipeline::new(Arc::new(faulty), fetcher);

    assert!(!pipeline.has_cached(Section::Today));
    let outcomes = collect(pipeline.run(Section::Today, CancellationToken::new())).await;
    assert_eq!(outcomes, vec![LoadOutcome::Unavailable]);
  }

  #[tokio::test]
  async fn test_cache_write_fault_still_shows_fresh() {
    let mut faulty = FaultyCache::new(NoopCache);
    faulty.fail_put = true;
    let cache = Arc::new(faulty);

    let fresh = snapshot(Section::Today, "fresh", start());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.push(Section::Today, Step::Succeed(fresh.clone()));
    let pipeline = LoadPipeline::new(cache.clone(), fetcher);

    let outcomes = collect(pipeline.run(Section::Today, CancellationToken::new())).await;

    assert_eq!(outcomes, vec![LoadOutcome::fresh(fresh)]);
    assert_eq!(cache.puts.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_zero_capacity_cache_never_hits() {
    let clock = ManualClock::new(start());
    let cache = Arc::new(ExpiringBoundedCache::new(
      CacheConfig::default().with_max_entries(0),
      Arc::new(clock.clone()),
    ));
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.push(
      Section::Today,
      Step::Succeed(snapshot(Section::Today, "S1", clock.now())),
    );
    fetcher.push(Section::Today, Step::Fail(transport_error()));
    let pipeline = LoadPipeline::new(cache, fetcher);

    let first = pipeline.load(Section::Today, CancellationToken::new()).await;
    assert!(matches!(first, Some(LoadOutcome::Showing { is_stale: false, .. })));

    let second = collect(pipeline.run(Section::Today, CancellationToken::new())).await;
    assert_eq!(second, vec![LoadOutcome::Unavailable]);
  }

  #[tokio::test]
  async fn test_cancel_during_fetch_emits_nothing_and_skips_persist() {
    let clock = ManualClock::new(start());
    let cache = Arc::new(FaultyCache::new(ExpiringBoundedCache::new(
      CacheConfig::default(),
      Arc::new(clock.clone()),
    )));
    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.push(
      Section::Today,
      Step::gated(&gate, Step::Succeed(snapshot(Section::Today, "late", clock.now()))),
    );
    let pipeline = LoadPipeline::new(cache.clone(), fetcher.clone());

    let cancel = CancellationToken::new();
    let mut stream = pipeline.run(Section::Today, cancel.clone());

    // Let the fetch start, then cancel and release it
    while fetcher.calls() == 0 {
      tokio::task::yield_now().await;
    }
    cancel.cancel();
    gate.notify_one();

    let next = tokio::time::timeout(StdDuration::from_secs(5), stream.next())
      .await
      .unwrap();
    assert_eq!(next, None);
    assert_eq!(cache.puts.load(Ordering::SeqCst), 0);
    assert!(cache.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_cancel_after_cached_emission_stops_run() {
    let h = harness();
    let s1 = snapshot(Section::Today, "S1", h.clock.now());
    h.cache.put(Section::Today, s1.clone()).unwrap();
    let gate = Arc::new(Notify::new());
    h.fetcher.push(
      Section::Today,
      Step::gated(&gate, Step::Fail(transport_error())),
    );

    let cancel = CancellationToken::new();
    let mut stream = h.pipeline.run(Section::Today, cancel.clone());

    assert_eq!(stream.next().await, Some(LoadOutcome::fresh(s1)));
    cancel.cancel();
    gate.notify_one();

    assert_eq!(collect(stream).await, Vec::new());
  }

  #[tokio::test]
  async fn test_dropped_stream_stops_run() {
    let clock = ManualClock::new(start());
    let cache = Arc::new(FaultyCache::new(ExpiringBoundedCache::new(
      CacheConfig::default(),
      Arc::new(clock.clone()),
    )));
    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.push(
      Section::Today,
      Step::gated(&gate, Step::Succeed(snapshot(Section::Today, "late", clock.now()))),
    );
    let pipeline = LoadPipeline::new(cache.clone(), fetcher.clone());

    let stream = pipeline.run(Section::Today, CancellationToken::new());
    while fetcher.calls() == 0 {
      tokio::task::yield_now().await;
    }
    drop(stream);
    gate.notify_one();
    tokio::time::sleep(StdDuration::from_millis(20)).await;

    assert_eq!(cache.puts.load(Ordering::SeqCst), 0);
    assert!(cache.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_load_keeps_terminal_outcome_after_late_cancel() {
    let h = harness();
    let s1 = snapshot(Section::Today, "S1", h.clock.now());
    h.fetcher.push(Section::Today, Step::Succeed(s1.clone()));
    let cancel = CancellationToken::new();

    let stream = h.pipeline.run(Section::Today, cancel.clone());
    // Wait until the run has delivered everything, then cancel before draining
    while !h.pipeline.has_cached(Section::Today) {
      tokio::task::yield_now().await;
    }
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    cancel.cancel();

    assert_eq!(stream.terminal().await, Some(LoadOutcome::fresh(s1)));
  }

  #[tokio::test]
  async fn test_load_without_terminal_outcome_is_none() {
    let (tx, rx) = mpsc::channel(OUTCOME_BUFFER);
    let cached = snapshot(Section::Today, "cached", start());
    tx.send(Emission {
      outcome: LoadOutcome::fresh(cached),
      terminal: false,
    })
    .await
    .unwrap();
    drop(tx);

    assert_eq!(OutcomeStream { rx }.terminal().await, None);
  }

  #[tokio::test]
  async fn test_cancelled_before_start_emits_nothing() {
    let h = harness();
    h.cache
      .put(Section::Today, snapshot(Section::Today, "S1", h.clock.now()))
      .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcomes = collect(h.pipeline.run(Section::Today, cancel.clone())).await;

    assert!(outcomes.is_empty());
    assert_eq!(h.pipeline.load(Section::Today, cancel).await, None);
  }

  #[tokio::test]
  async fn test_fetch_panic_surfaces_as_failed() {
    let h = harness();
    h.fetcher.push(Section::Opinion, Step::Panic("decoder exploded"));

    let outcomes = collect(h.pipeline.run(Section::Opinion, CancellationToken::new())).await;

    assert_eq!(
      outcomes,
      vec![LoadOutcome::Failed(
        "Loading Opinion failed unexpectedly: decoder exploded".to_string()
      )]
    );
  }

  #[tokio::test]
  async fn test_independent_runs_share_cache() {
    let h = harness();
    let today = snapshot(Section::Today, "today", h.clock.now());
    let sports = snapshot(Section::Sports, "sports", h.clock.now());
    h.fetcher.push(Section::Today, Step::Succeed(today.clone()));
    h.fetcher.push(Section::Sports, Step::Succeed(sports.clone()));

    let (a, b) = tokio::join!(
      collect(h.pipeline.run(Section::Today, CancellationToken::new())),
      collect(h.pipeline.run(Section::Sports, CancellationToken::new())),
    );

    assert_eq!(a, vec![LoadOutcome::fresh(today)]);
    assert_eq!(b, vec![LoadOutcome::fresh(sports)]);
    assert_eq!(h.cache.len().unwrap(), 2);
  }
}
