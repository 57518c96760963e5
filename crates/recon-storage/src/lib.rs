//! Catalog persistence + HTTP fetch utilities for the reconciliation engine.

mod catalog;
mod postgres;

use std::time::Duration;

use anyhow::Context;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn, Instrument};

pub use catalog::{Catalog, MemoryCatalog};
pub use postgres::{run_migrations, PgCatalog};

pub const CRATE_NAME: &str = "recon-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// No retries at all; used by tests that assert on a single status.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
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

/// Pre-supplied Basic-Auth credential (e.g. a WordPress application password).
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn header_u32(&self, name: &str) -> Option<u32> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("undecodable response from {url}: {message}")]
    Decode { url: String, message: String },
}

#[derive(Debug, Clone)]
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

    /// GET `url` with query parameters, retrying transient failures with backoff.
    ///
    /// Non-2xx responses that survive the retry budget come back as
    /// [`FetchError::HttpStatus`]; callers decide whether that is fatal.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        auth: Option<&BasicAuth>,
    ) -> Result<FetchedResponse, FetchError> {
        let span = tracing::info_span!("http_fetch", url);
        self.get_with_retries(url, query, auth).instrument(span).await
    }

    async fn get_with_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
        auth: Option<&BasicAuth>,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            let mut request = self.client.get(url).query(query);
            if let Some(auth) = auth {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let headers = resp.headers().clone();
                        let body = resp.bytes().await?.to_vec();
                        debug!(status = status.as_u16(), bytes = body.len(), "fetched");
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            headers,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(status = status.as_u16(), attempt, "retryable status, backing off");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(error = %err, attempt, "request failed, backing off");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn basic_auth_debug_redacts_password() {
        let auth = BasicAuth {
            username: "editor".into(),
            password: "abcd efgh".into(),
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("editor"));
        assert!(!rendered.contains("abcd"));
    }
}
