//! HTTP fetch utilities and the event persistence gateway.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

mod gateway;
mod postgres;

pub use gateway::{EventStore, PersistenceGateway, StoreError, UPSERT_BATCH_SIZE};
pub use postgres::PgEventStore;

pub const CRATE_NAME: &str = "evsync-storage";

/// What to do after a failed attempt. Evaluated once per failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Wait for the provider's `Retry-After` hint (or the default) and retry.
    ProviderHint,
    /// Wait for the next step of the backoff schedule and retry.
    Backoff,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RetryDisposition::ProviderHint,
        StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT => RetryDisposition::Backoff,
        s if s.is_server_error() => RetryDisposition::Backoff,
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Backoff
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Seconds-form `Retry-After`. The HTTP-date form is not used by the provider.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts per request, the first one included. Rate-limited attempts count too.
    pub max_attempts: usize,
    pub schedule: Vec<Duration>,
    pub rate_limit_default: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            schedule: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            rate_limit_default: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Escalates through the schedule and stays on its last step.
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        self.schedule
            .get(attempt_index)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or_default()
    }

    /// Delay before the next attempt, or `None` when the failure must not be retried.
    pub fn delay_for(
        &self,
        disposition: RetryDisposition,
        attempt_index: usize,
        retry_after: Option<Duration>,
    ) -> Option<Duration> {
        match disposition {
            RetryDisposition::ProviderHint => Some(retry_after.unwrap_or(self.rate_limit_default)),
            RetryDisposition::Backoff => Some(self.delay_for_attempt(attempt_index)),
            RetryDisposition::NonRetryable => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: usize,
        last_error: String,
    },
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// GET with query parameters, retrying per the backoff policy.
    ///
    /// Query values are never logged since they carry the API key.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        self.fetch_with_retries(url, query).instrument(span).await
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let (disposition, retry_after) = match self.client.get(url).query(query).send().await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let final_url = resp.url().to_string();
                        match resp.bytes().await {
                            Ok(body) => {
                                return Ok(FetchedResponse {
                                    status,
                                    final_url,
                                    body: body.to_vec(),
                                })
                            }
                            Err(err) => {
                                last_error = err.to_string();
                                (classify_reqwest_error(&err), None)
                            }
                        }
                    } else {
                        let disposition = classify_status(status);
                        let retry_after = parse_retry_after(resp.headers());
                        let body = resp.text().await.unwrap_or_default();
                        if disposition == RetryDisposition::NonRetryable {
                            return Err(FetchError::HttpStatus {
                                status: status.as_u16(),
                                url: url.to_string(),
                                body,
                            });
                        }
                        last_error = format!("http status {}", status.as_u16());
                        (disposition, retry_after)
                    }
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::NonRetryable {
                        return Err(FetchError::Request {
                            url: url.to_string(),
                            source: err,
                        });
                    }
                    last_error = err.to_string();
                    (disposition, None)
                }
            };

            if attempt + 1 == max_attempts {
                break;
            }
            let Some(delay) = self.backoff.delay_for(disposition, attempt, retry_after) else {
                break;
            };
            warn!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = last_error.as_str(),
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}
