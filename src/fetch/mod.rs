//! Feed fetchers: the network side of a load.
//!
//! The pipeline only sees the `Fetcher` contract. Two implementations ship
//! with the crate: a template-driven mock and a JSON-over-HTTP client.

mod http;
mod mock;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::feed::{ContentSnapshot, Section};

pub use http::HttpFetcher;
pub use mock::MockFetcher;

/// Why a fetch did not produce a snapshot.
///
/// Every variant is treated the same way by the pipeline (fall back to the
/// cache), the distinction only matters for logging.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("Invalid response: {0}")]
  InvalidResponse(String),

  #[error("Unacceptable status code {0}")]
  UnacceptableStatus(u16),

  #[error("Transport error: {0}")]
  Transport(String),

  #[error("Fetch cancelled")]
  Cancelled,

  #[error("Unknown fetch error: {0}")]
  Unknown(String),
}

/// Source of fresh section snapshots.
///
/// Implementations should watch `cancel` and return `FetchError::Cancelled`
/// promptly once it fires.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(
    &self,
    section: Section,
    cancel: &CancellationToken,
  ) -> Result<ContentSnapshot, FetchError>;
}
