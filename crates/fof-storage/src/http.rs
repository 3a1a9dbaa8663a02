use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fetcher shut down")]
    Closed,
}

impl FetchError {
    /// Throttling, 5xx and connection-level failures may succeed on a later
    /// attempt; client errors and undecodable bodies will not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
                .unwrap_or(false),
            Self::Request(err) => err.is_timeout() || err.is_connect(),
            Self::Decode { .. } | Self::Closed => false,
        }
    }
}

/// Doubling delay between attempts, capped at `max_delay`. `max_retries = 0`
/// (the default) sends each request exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self::with_retries(0)
    }

    pub fn with_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_before(&self, retry: usize) -> Duration {
        let shift = u32::try_from(retry).unwrap_or(u32::MAX).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Requests allowed in flight across every clone of the fetcher.
    pub max_in_flight: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            max_in_flight: 8,
            backoff: BackoffPolicy::none(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        Ok(Self {
            client: builder.build().context("building HTTP client")?,
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            backoff: config.backoff,
        })
    }

    /// Same client and in-flight limit, but every request is sent exactly once.
    pub fn without_retries(&self) -> Self {
        Self {
            backoff: BackoffPolicy::none(),
            ..self.clone()
        }
    }

    /// POSTs `body` as JSON and decodes the JSON reply. Non-2xx statuses are
    /// errors; transient failures are retried only as far as the backoff
    /// policy allows.
    pub async fn post_json(&self, url: &str, body: &JsonValue) -> Result<JsonValue, FetchError> {
        let _permit = self.permits.acquire().await.map_err(|_| FetchError::Closed)?;
        self.post_with_retries(url, body)
            .instrument(info_span!("http_post", url))
            .await
    }

    async fn post_with_retries(
        &self,
        url: &str,
        body: &JsonValue,
    ) -> Result<JsonValue, FetchError> {
        let mut retry = 0;
        loop {
            let err = match self.post_once(url, body).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if retry >= self.backoff.max_retries || !err.is_transient() {
                return Err(err);
            }
            let delay = self.backoff.delay_before(retry);
            warn!(
                error = %err,
                retry,
                delay_ms = delay.as_millis() as u64,
                "transient HTTP failure; retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn post_once(&self, url: &str, body: &JsonValue) -> Result<JsonValue, FetchError> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| FetchError::Decode {
            url: final_url,
            source,
        })
    }
}
