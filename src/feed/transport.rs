use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use crate::util::{validate_url, validate_url_for_open, UrlValidationError};

/// Lower-level failures while retrieving a feed document.
///
/// The fetcher wraps these into a per-feed `FetchError`; they never reach
/// the aggregation result directly.
#[derive(Debug, Error)]
pub enum TransportError {
    /// URL rejected before any request was made
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// A single attempt exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Server kept answering 429 Too Many Requests
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large (limit {0} bytes)")]
    ResponseTooLarge(usize),
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Retrieves raw feed documents by URL.
///
/// The production implementation is [`HttpTransport`]; tests substitute
/// in-memory transports.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Knobs for [`HttpTransport`], normally derived from `Config`.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Budget for one attempt (request and body).
    pub timeout: Duration,
    /// Retries after the first attempt for 429, 5xx and truncated bodies.
    pub max_retries: u32,
    /// First backoff delay; doubled for every further retry.
    pub retry_base_delay: Duration,
    pub max_body_bytes: usize,
    /// Skip the SSRF check on feed URLs (tests, intranet feeds).
    pub allow_private_hosts: bool,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            allow_private_hosts: false,
            user_agent: concat!("canopy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Limits redirects to 3 hops and rejects loops.
///
/// Unless private hosts are allowed, every hop is held to the same SSRF
/// check as the initial URL.
fn create_redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        if let Err(e) = check_redirect_target(url, allow_private_hosts) {
            tracing::warn!(to = %url, error = %e, "Refusing redirect");
            return attempt.error(e);
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

fn check_redirect_target(
    url: &reqwest::Url,
    allow_private_hosts: bool,
) -> Result<(), UrlValidationError> {
    if allow_private_hosts {
        validate_url_for_open(url.as_str())?;
    } else {
        validate_url(url.as_str())?;
    }
    Ok(())
}

/// HTTP(S) transport on a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl HttpTransport {
    pub fn new(settings: FetchSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(create_redirect_policy(settings.allow_private_hosts))
            .user_agent(settings.user_agent.clone())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    async fn attempt(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }
        read_limited_bytes(response, self.settings.max_body_bytes).await
    }
}

/// 429, 5xx and truncated downloads are worth another attempt; 4xx are not.
fn is_retryable(err: &TransportError) -> bool {
    match err {
        TransportError::HttpStatus(status) => *status == 429 || (500..=599).contains(status),
        TransportError::IncompleteResponse { .. } => true,
        _ => false,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// Fetches `url` with per-attempt timeout and exponential backoff.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidUrl`] - scheme or host rejected
    /// - [`TransportError::Timeout`] - an attempt ran past the timeout
    /// - [`TransportError::HttpStatus`] - non-2xx response (5xx after retries)
    /// - [`TransportError::RateLimited`] - still 429 after retries
    /// - [`TransportError::ResponseTooLarge`] - body over the size limit
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        if self.settings.allow_private_hosts {
            validate_url_for_open(url)?;
        } else {
            validate_url(url)?;
        }

        let mut retry_count = 0;
        loop {
            let result = tokio::time::timeout(self.settings.timeout, self.attempt(url))
                .await
                .map_err(|_| TransportError::Timeout(self.settings.timeout))?;

            let err = match result {
                Ok(bytes) => return Ok(bytes),
                Err(err) if is_retryable(&err) && retry_count < self.settings.max_retries => err,
                Err(TransportError::HttpStatus(429)) => {
                    return Err(TransportError::RateLimited(self.settings.max_retries))
                }
                Err(err) => return Err(err),
            };

            let delay = self
                .settings
                .retry_base_delay
                .saturating_mul(1u32 << retry_count.min(16));
            tracing::warn!(
                feed = %url,
                error = %err,
                retry = retry_count,
                delay_ms = delay.as_millis() as u64,
                "Feed request failed, retrying after delay"
            );
            tokio::time::sleep(delay).await;
            retry_count += 1;
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(TransportError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(TransportError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
