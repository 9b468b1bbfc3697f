use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{CacheConfig, ExpiringBoundedCache, FeedCache, NoopCache};
use crate::clock::{SharedClock, SystemClock};
use crate::feed::Section;
use crate::fetch::{Fetcher, HttpFetcher, MockFetcher};
use crate::pipeline::LoadPipeline;
use crate::supervisor::LoadSupervisor;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Section loaded when none is given on the command line
  pub default_section: Option<Section>,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub source: SourceConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
  /// Set to false to disable caching entirely
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Seconds a snapshot stays usable after it was fetched
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  #[serde(default = "default_max_entries")]
  pub max_entries: usize,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_secs: default_ttl_secs(),
      max_entries: default_max_entries(),
    }
  }
}

impl CacheSettings {
  pub fn cache_config(&self) -> Result<CacheConfig> {
    let ttl = i64::try_from(self.ttl_secs)
      .ok()
      .and_then(Duration::try_seconds)
      .ok_or_else(|| eyre!("cache.ttl_secs out of range: {}", self.ttl_secs))?;

    Ok(
      CacheConfig::default()
        .with_ttl(ttl)
        .with_max_entries(self.max_entries),
    )
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  /// Built-in generated feed, no network
  #[default]
  Mock,
  /// JSON over HTTP from `base_url`
  Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
  #[serde(default)]
  pub kind: SourceKind,
  /// Required for the http source (e.g., "https://news.example.com/api")
  pub base_url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Simulated latency of the mock source
  #[serde(default = "default_latency_ms")]
  pub latency_ms: u64,
  /// Make the mock source fail every fetch
  #[serde(default)]
  pub offline: bool,
}

impl Default for SourceConfig {
  fn default() -> Self {
    Self {
      kind: SourceKind::Mock,
      base_url: None,
      timeout_secs: default_timeout_secs(),
      latency_ms: default_latency_ms(),
      offline: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter used when RUST_LOG is not set
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Log to stderr instead of the rolling file
  #[serde(default)]
  pub stderr: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      stderr: false,
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_ttl_secs() -> u64 {
  60
}

fn default_max_entries() -> usize {
  10
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_latency_ms() -> u64 {
  300
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./homefeed.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/homefeed/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("homefeed.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("homefeed").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the feed API token from the environment, if any.
  ///
  /// Checks HOMEFEED_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("HOMEFEED_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }

  /// Directory for log files.
  pub fn log_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("homefeed").join("logs"))
  }

  pub fn build_cache(&self, clock: SharedClock) -> Result<Arc<dyn FeedCache>> {
    if self.cache.enabled {
      Ok(Arc::new(ExpiringBoundedCache::new(
        self.cache.cache_config()?,
        clock,
      )))
    } else {
      Ok(Arc::new(NoopCache))
    }
  }

  pub fn build_fetcher(&self, clock: SharedClock) -> Result<Arc<dyn Fetcher>> {
    match self.source.kind {
      SourceKind::Mock => {
        let fetcher = MockFetcher::new()
          .with_latency(std::time::Duration::from_millis(self.source.latency_ms))
          .with_clock(clock);
        fetcher.set_offline(self.source.offline);
        Ok(Arc::new(fetcher))
      }
      SourceKind::Http => {
        let base_url = self
          .source
          .base_url
          .as_deref()
          .ok_or_else(|| eyre!("source.base_url is required for the http source"))?;
        let mut fetcher = HttpFetcher::new(
          base_url,
          std::time::Duration::from_secs(self.source.timeout_secs),
        )?
        .with_clock(clock);
        if let Some(token) = Self::get_api_token() {
          fetcher = fetcher.with_token(token);
        }
        Ok(Arc::new(fetcher))
      }
    }
  }

  /// Wire clock, cache, fetcher and pipeline into a supervisor.
  pub fn build_supervisor(&self) -> Result<LoadSupervisor> {
    let clock: SharedClock = Arc::new(SystemClock);
    let cache = self.build_cache(clock.clone())?;
    let fetcher = self.build_fetcher(clock)?;
    Ok(LoadSupervisor::new(LoadPipeline::new(cache, fetcher)))
  }
}
