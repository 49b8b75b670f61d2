//! HTTP fetch capability with exponential backoff retry logic.
//!
//! The rest of the pipeline never talks to the network directly: discovery,
//! extraction, and the image archiver all take an injected [`Fetch`]
//! implementation. Production wires up [`HttpFetcher`] wrapped in
//! [`RetryFetch`]; tests inject a stub.
//!
//! # Retry Strategy
//!
//! - Maximum 3 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use std::fmt;
use std::time::Duration;

use rand::{Rng, rng};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::ScrapeError;

/// Browser-compatible identity presented to the target host.
const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; TasteOfCinemaBot/1.0; +https://github.com/basemkhurram)";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: usize = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Trait for fetching raw bytes from a URL.
///
/// Implementors may be plain transports or decorators (like retry logic).
pub trait Fetch {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ScrapeError>;
}

/// Plain `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Fetch {
                url: url.to_string(),
                message: format!("HTTP status {status}"),
            });
        }
        let bytes = response.bytes().await?;
        debug!(%url, bytes = bytes.len(), "Fetched");
        Ok(bytes.to_vec())
    }
}

/// Decorator that adds exponential backoff retry to any [`Fetch`]
/// implementation.
///
/// The delay between retries follows:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryFetch<T>
where
    T: Fetch,
{
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self { inner, max_retries, base_delay, max_delay: MAX_BACKOFF }
    }

    /// Production defaults: 3 retries starting at 1 second.
    pub fn with_defaults(inner: T) -> Self {
        Self::new(inner, MAX_RETRIES, BASE_BACKOFF)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Fetch for RetryFetch<T>
where
    T: Fetch,
{
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        let mut attempt = 0usize;

        loop {
            match self.inner.fetch(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        error!(%url, attempt, max = self.max_retries, error = %e, "fetch exhausted retries");
                        return Err(e);
                    }

                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(%url, attempt, max = self.max_retries, ?delay, error = %e, "fetch attempt failed; backing off");
                    sleep(delay).await;
                }
            }
        }
    }
}
