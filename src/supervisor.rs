//! Latest-request-wins supervision of load pipeline runs.
//!
//! The supervisor owns at most one active run. Starting a new request
//! cancels the previous run and bumps the generation; every outcome is
//! applied to the published view only if its generation is still current.
//! The generation lives inside the watched value, so the check and the
//! write happen under the same lock and a superseded run can never
//! overwrite newer state.

use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::feed::{ContentSnapshot, LoadOutcome, Section};
use crate::pipeline::{LoadPipeline, OutcomeStream};

/// What the content area should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentState {
  /// Nothing to show yet; a loading indicator is appropriate
  AwaitingFirstResult,
  Showing(ContentSnapshot),
  /// Offline with nothing cached
  Unavailable,
  Failed(String),
}

/// Offline / last-updated banner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BannerState {
  pub visible: bool,
  pub last_updated_label: Option<String>,
}

/// Lifecycle of the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
  Idle,
  Running(Section),
  Settled(Section),
  Cancelled,
}

/// Everything the presentation layer needs to render a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedView {
  pub content: ContentState,
  pub banner: BannerState,
  pub phase: RequestPhase,
}

impl Default for FeedView {
  fn default() -> Self {
    Self {
      content: ContentState::AwaitingFirstResult,
      banner: BannerState::default(),
      phase: RequestPhase::Idle,
    }
  }
}

impl FeedView {
  /// A request is running and nothing has been shown for it yet.
  pub fn is_loading(&self) -> bool {
    matches!(self.phase, RequestPhase::Running(_))
      && self.content == ContentState::AwaitingFirstResult
  }
}

/// Watched value: the view plus the generation allowed to write it.
#[derive(Debug, Clone, Default)]
struct Published {
  generation: u64,
  view: FeedView,
}

/// Receiving side of the published view.
#[derive(Debug, Clone)]
pub struct ViewSubscription {
  rx: watch::Receiver<Published>,
}

impl ViewSubscription {
  pub fn current(&self) -> FeedView {
    self.rx.borrow().view.clone()
  }

  /// Wait for the next change. Returns `None` once the supervisor is gone.
  pub async fn changed(&mut self) -> Option<FeedView> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().view.clone())
  }

  /// Wait until the view satisfies `predicate`, checking the current value first.
  pub async fn wait_for(&mut self, mut predicate: impl FnMut(&FeedView) -> bool) -> Option<FeedView> {
    let published = self.rx.wait_for(|p| predicate(&p.view)).await.ok()?;
    Some(published.view.clone())
  }
}

struct ActiveRequest {
  generation: u64,
  section: Section,
  cancel: CancellationToken,
  task: JoinHandle<()>,
}

/// Owns one active pipeline run at a time and publishes its outcomes.
pub struct LoadSupervisor {
  pipeline: LoadPipeline,
  state: Arc<watch::Sender<Published>>,
  active: Mutex<Option<ActiveRequest>>,
  last_section: Mutex<Option<Section>>,
}

impl LoadSupervisor {
  pub fn new(pipeline: LoadPipeline) -> Self {
    let (tx, _rx) = watch::channel(Published::default());
    Self {
      pipeline,
      state: Arc::new(tx),
      active: Mutex::new(None),
      last_section: Mutex::new(None),
    }
  }

  pub fn subscribe(&self) -> ViewSubscription {
    ViewSubscription {
      rx: self.state.subscribe(),
    }
  }

  /// Current published view.
  pub fn view(&self) -> FeedView {
    self.state.borrow().view.clone()
  }

  /// Section of the most recent request, cancelled or not.
  pub fn current_section(&self) -> Option<Section> {
    *lock(&self.last_section)
  }

  pub fn has_cached(&self, section: Section) -> bool {
    self.pipeline.has_cached(section)
  }

  /// Start loading `section`, superseding whatever was running.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn request(&self, section: Section) {
    let mut active = lock(&self.active);

    let has_cached = self.pipeline.has_cached(section);
    let generation = begin(&self.state, section, has_cached);

    if let Some(previous) = active.take() {
      debug!(
        section = %previous.section,
        generation = previous.generation,
        "cancelling superseded request"
      );
      previous.cancel.cancel();
    }

    info!(%section, generation, has_cached, "load requested");

    let cancel = CancellationToken::new();
    let outcomes = self.pipeline.run(section, cancel.clone());
    let task = tokio::spawn(consume(
      Arc::clone(&self.state),
      generation,
      section,
      cancel.clone(),
      outcomes,
    ));

    *active = Some(ActiveRequest {
      generation,
      section,
      cancel,
      task,
    });
    *lock(&self.last_section) = Some(section);
  }

  /// Request the most recent section again. No-op if nothing was requested.
  pub fn refresh(&self) {
    if let Some(section) = self.current_section() {
      self.request(section);
    }
  }

  /// Cancel the active request without starting another.
  ///
  /// The published content is left as it is; only the phase changes, and
  /// only if the request had not settled yet.
  pub fn cancel(&self) {
    let Some(previous) = lock(&self.active).take() else {
      return;
    };

    previous.cancel.cancel();
    let cancelled = self.state.send_if_modified(|published| {
      published.generation += 1;
      if matches!(published.view.phase, RequestPhase::Running(_)) {
        published.view.phase = RequestPhase::Cancelled;
        true
      } else {
        false
      }
    });

    if cancelled {
      info!(section = %previous.section, generation = previous.generation, "load cancelled");
    }
  }

  /// Whether the active request's consumer has finished.
  pub fn is_idle(&self) -> bool {
    lock(&self.active)
      .as_ref()
      .map(|active| active.task.is_finished())
      .unwrap_or(true)
  }
}

impl Drop for LoadSupervisor {
  fn drop(&mut self) {
    if let Some(active) = lock(&self.active).take() {
      active.cancel.cancel();
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open a new generation and return it.
fn begin(state: &watch::Sender<Published>, section: Section, has_cached: bool) -> u64 {
  let mut generation = 0;
  state.send_if_modified(|published| {
    published.generation += 1;
    generation = published.generation;

    let before = published.view.clone();
    published.view.phase = RequestPhase::Running(section);
    if !has_cached {
      published.view.content = ContentState::AwaitingFirstResult;
    }
    published.view != before
  });
  generation
}

/// Drain a run, publishing each outcome while `generation` is current.
async fn consume(
  state: Arc<watch::Sender<Published>>,
  generation: u64,
  section: Section,
  cancel: CancellationToken,
  mut outcomes: OutcomeStream,
) {
  loop {
    let outcome = tokio::select! {
      biased;
      _ = cancel.cancelled() => return,
      outcome = outcomes.next() => outcome,
    };

    match outcome {
      Some(outcome) => {
        if !apply(&state, generation, &outcome) {
          return;
        }
      }
      None => break,
    }
  }

  state.send_if_modified(|published| {
    if published.generation != generation {
      return false;
    }
    published.view.phase = RequestPhase::Settled(section);
    true
  });
  debug!(%section, generation, "request settled");
}

/// Apply one outcome. Returns `false` if `generation` has been superseded.
fn apply(state: &watch::Sender<Published>, generation: u64, outcome: &LoadOutcome) -> bool {
  let mut current = true;

  state.send_if_modified(|published| {
    if published.generation != generation {
      current = false;
      return false;
    }

    let before = published.view.clone();
    let view = &mut published.view;
    match outcome {
      LoadOutcome::Showing { snapshot, is_stale } => {
        view.content = ContentState::Showing(snapshot.clone());
        view.banner = BannerState {
          visible: *is_stale,
          last_updated_label: Some(last_updated_label(
            &snapshot.fetched_at.with_timezone(&Local),
          )),
        };
      }
      LoadOutcome::Unavailable => {
        view.content = ContentState::Unavailable;
        view.banner = BannerState {
          visible: true,
          last_updated_label: None,
        };
      }
      LoadOutcome::Failed(message) => {
        view.content = ContentState::Failed(message.clone());
      }
    }
    published.view != before
  });

  if !current {
    debug!(generation, "discarding outcome from superseded request");
  }
  current
}

/// Banner text for a snapshot timestamp, e.g. "Last update on February 5 at 09:30".
pub fn last_updated_label<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
  Tz::Offset: Display,
{
  format!("Last update on {}", at.format("%B %-d at %H:%M"))
}
