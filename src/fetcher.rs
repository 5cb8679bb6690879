//! Resource fetcher
//!
//! One timed GET per call, no internal retries. The player owns the retry
//! policy; this layer only reports whether an attempt produced a usable
//! payload.
//!
//! A response is usable when the status is a success and the server
//! declared a non-zero `Content-Length`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::hls::HlsError;

/// Why a single fetch attempt failed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(StatusCode),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Empty or undeclared content length")]
    EmptyBody,

    #[error(transparent)]
    Manifest(#[from] HlsError),
}

impl FetchError {
    /// `true` for failures that point at the URL itself (HTTP error status,
    /// unresolvable or unreachable host) rather than a transient condition.
    pub fn is_bad_url(&self) -> bool {
        match self {
            Self::Status(_) => true,
            Self::Request(e) => e.is_connect() || e.is_builder() || e.is_status(),
            Self::Timeout(_) | Self::EmptyBody | Self::Manifest(_) => false,
        }
    }
}

/// A successfully downloaded resource.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,
    /// Byte length declared by the server.
    pub content_length: u64,
}

impl Fetched {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport seam between the player and the network.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform a single GET bounded by `timeout`.
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Fetched, FetchError>;
}

/// reqwest-backed fetcher shared by every session.
///
/// Cloning is cheap; all clones use the same connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Fetched, FetchError> {
        let start = Instant::now();

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let content_length = match response.content_length() {
            Some(len) if len > 0 => len,
            _ => return Err(FetchError::EmptyBody),
        };

        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        debug!(
            %status,
            content_length,
            elapsed_ms = start.elapsed().as_millis(),
            "Fetched"
        );

        Ok(Fetched {
            body,
            content_length,
        })
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Request(e)
    }
}
