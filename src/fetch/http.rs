//! Fetcher that loads section feeds from a JSON HTTP endpoint.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{FetchError, Fetcher};
use crate::clock::{SharedClock, SystemClock};
use crate::feed::{ContentSnapshot, FeedItem, Section};

/// Loads `GET {base_url}/sections/{slug}`, expecting a JSON array of items.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  clock: SharedClock,
}

impl HttpFetcher {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let mut base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid feed base URL {}: {}", base_url, e))?;

    // Url::join replaces the last path segment unless the path ends in a slash
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token: None,
      clock: Arc::new(SystemClock),
    })
  }

  /// Send `Authorization: Bearer <token>` with every request.
  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.token = Some(token.into());
    self
  }

  pub fn with_clock(mut self, clock: SharedClock) -> Self {
    self.clock = clock;
    self
  }

  /// Endpoint for a section.
  pub fn section_url(&self, section: Section) -> Result<Url, FetchError> {
    self
      .base_url
      .join(&format!("sections/{}", section.slug()))
      .map_err(|e| FetchError::Unknown(e.to_string()))
  }

  async fn fetch_items(&self, section: Section) -> Result<Vec<FeedItem>, FetchError> {
    let url = self.section_url(section)?;
    debug!(%section, %url, "fetching section feed");

    let mut request = self.client.get(url);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(map_transport_error)?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::UnacceptableStatus(status.as_u16()));
    }

    let body = response.bytes().await.map_err(map_transport_error)?;
    serde_json::from_slice(&body).map_err(|e| FetchError::InvalidResponse(e.to_string()))
  }
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
  if e.is_decode() {
    FetchError::InvalidResponse(e.to_string())
  } else if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
    FetchError::Transport(e.to_string())
  } else {
    FetchError::Unknown(e.to_string())
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(
    &self,
    section: Section,
    cancel: &CancellationToken,
  ) -> Result<ContentSnapshot, FetchError> {
    let items = tokio::select! {
      _ = cancel.cancelled() => return Err(FetchError::Cancelled),
      items = self.fetch_items(section) => items?,
    };

    Ok(ContentSnapshot::new(items, self.clock.now()))
  }
}
