//! HTTP client shared by all retailer adapters.
//!
//! Owns rate-limiter pacing and the mapping from HTTP outcomes to the
//! fetch error taxonomy. Transient covers timeouts, connection failures
//! and 429/5xx; permanent covers 404/410, other client errors, malformed
//! URLs and detected block pages.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::user_agent::UserAgentRotator;
use crate::error::FetchError;
use crate::models::Retailer;
use crate::rate_limit::RateLimiter;

/// Body markers that identify an anti-bot interstitial. A block page
/// comes back as 200 but carries no reviews and will not recover on
/// retry, so it is a permanent failure.
const BLOCK_PAGE_MARKERS: &[&str] = &[
    "Robot or human?",
    "px-captcha",
    "Access Denied",
    "/blocked?url=",
];

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    limiter: RateLimiter,
    user_agents: Arc<UserAgentRotator>,
}

impl HttpClient {
    pub fn new(limiter: RateLimiter, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            limiter,
            user_agents: Arc::new(UserAgentRotator::default()),
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetch a page as text, pacing the request through the retailer's
    /// rate-limit cursor.
    pub async fn get_text(&self, retailer: Retailer, url: &str) -> Result<String, FetchError> {
        if url::Url::parse(url).is_err() {
            return Err(FetchError::Permanent(format!("malformed URL: {url}")));
        }

        self.limiter.acquire(retailer).await;
        debug!(retailer = %retailer, url, "fetching page");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, self.user_agents.next())
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| FetchError::Transient(format!("body read failed: {e}")))?;
            if let Some(marker) = BLOCK_PAGE_MARKERS.iter().find(|m| body.contains(**m)) {
                return Err(FetchError::Permanent(format!(
                    "block page detected ({marker})"
                )));
            }
            return Ok(body);
        }

        Err(classify_status(status))
    }
}

fn classify_request_error(err: reqwest::Error) -> FetchError {
    if err.is_builder() || err.is_request() {
        FetchError::Permanent(format!("request construction failed: {err}"))
    } else {
        // Timeouts, connection resets, TLS hiccups: all retryable.
        FetchError::Transient(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode) -> FetchError {
    match status.as_u16() {
        404 | 410 => FetchError::Permanent(format!("gone: HTTP {status}")),
        408 | 425 | 429 => FetchError::Transient(format!("HTTP {status}")),
        500..=599 => FetchError::Transient(format!("HTTP {status}")),
        _ => FetchError::Permanent(format!("HTTP {status}")),
    }
}
