use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use homefeed::config::{Config, LogConfig};
use homefeed::{ContentState, FeedView, RequestPhase, Section};

#[derive(Parser, Debug)]
#[command(name = "homefeed")]
#[command(about = "Load section feeds offline-first and print every state change")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/homefeed/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Section to load; repeat to switch sections, the last one wins
  #[arg(short, long = "section")]
  sections: Vec<Section>,

  /// Make the mock source fail every fetch
  #[arg(long)]
  offline: bool,

  /// Refresh once after the first load settles (served from cache first)
  #[arg(long)]
  refresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  config.source.offline |= args.offline;

  let _guard = init_logging(&config.log)?;

  let supervisor = config.build_supervisor()?;
  let mut views = supervisor.subscribe();

  let sections = if args.sections.is_empty() {
    vec![config.default_section.unwrap_or(Section::Today)]
  } else {
    args.sections
  };
  let last = *sections
    .last()
    .ok_or_else(|| eyre!("No section to load"))?;

  for section in &sections {
    supervisor.request(*section);
  }

  let mut refreshes_left = usize::from(args.refresh);
  while let Some(view) = views.changed().await {
    println!("{}", describe(&view));

    match view.phase {
      RequestPhase::Settled(section) if section == last => {
        if refreshes_left == 0 {
          break;
        }
        refreshes_left -= 1;
        info!(%section, "refreshing");
        supervisor.refresh();
      }
      RequestPhase::Cancelled => break,
      _ => {}
    }
  }

  Ok(())
}

fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

  if config.stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let dir = Config::log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "homefeed.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

fn describe(view: &FeedView) -> String {
  let phase = match view.phase {
    RequestPhase::Idle => "idle".to_string(),
    RequestPhase::Running(section) => format!("{} (loading)", section),
    RequestPhase::Settled(section) => format!("{} (done)", section),
    RequestPhase::Cancelled => "cancelled".to_string(),
  };

  let content = match &view.content {
    ContentState::AwaitingFirstResult => "waiting for first result".to_string(),
    ContentState::Showing(snapshot) => match snapshot.items.first() {
      Some(item) => format!("{} items, top story: {}", snapshot.len(), item.title),
      None => "no stories".to_string(),
    },
    ContentState::Unavailable => "offline and nothing cached".to_string(),
    ContentState::Failed(message) => format!("error: {}", message),
  };

  let banner = if view.banner.visible {
    match &view.banner.last_updated_label {
      Some(label) => format!(" [offline: {}]", label),
      None => " [offline]".to_string(),
    }
  } else {
    String::new()
  };

  format!("{}: {}{}", phase, content, banner)
}
