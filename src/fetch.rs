//! HTTP access shared by every source adapter.
//!
//! Requests to one host are gated by a fixed minimum interval; different hosts
//! proceed concurrently. Transient failures (timeouts, connection errors, 5xx
//! and 429) are retried with exponential backoff; other 4xx responses fail at once.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient failure fetching {url}: {reason}")]
    Transient {
        url: String,
        reason: String,
        retry_after: Option<Duration>,
    },
    #[error("permanent failure fetching {url}: {reason}")]
    Permanent {
        url: String,
        status: Option<u16>,
        reason: String,
    },
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Fixed-interval gate keyed by host. Waiting suspends only the calling task.
#[derive(Debug, Default)]
pub struct HostLimiter {
    hosts: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<Instant>>>>>,
}

impl HostLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until at least `interval` has passed since the previous request to `host`.
    pub async fn acquire(&self, host: &str, interval: Duration) {
        let gate = {
            let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
            hosts.entry(host.to_string()).or_default().clone()
        };

        let mut last = gate.lock().await;
        if let Some(previous) = *last {
            let ready = previous + interval;
            if ready > Instant::now() {
                debug!(host, wait_ms = (ready - Instant::now()).as_millis() as u64, "rate limit wait");
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: `base * 2^(attempt-1)`, or the server's hint.
    pub fn backoff(&self, base: Duration, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_retry_after),
            None => base.saturating_mul(1 << attempt.saturating_sub(1).min(16)),
        }
    }
}

pub struct FetchEngine {
    client: Client,
    limiter: HostLimiter,
    policy: RetryPolicy,
}

impl FetchEngine {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            limiter: HostLimiter::new(),
            policy: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                max_retry_after: Duration::from_secs(config.max_retry_after_secs),
            },
        })
    }

    /// GET `url`, waiting `interval` between requests to the same host and
    /// using it as the base of the backoff schedule.
    pub async fn fetch(&self, url: &str, interval: Duration) -> Result<FetchResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }
        let host = match (parsed.host_str(), parsed.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => return Err(FetchError::InvalidUrl(url.to_string())),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire(&host, interval).await;

            let error = match self.attempt(url).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.policy.max_attempts {
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let hint = match &error {
                FetchError::Transient { retry_after, .. } => *retry_after,
                _ => None,
            };
            let delay = self.policy.backoff(interval, attempt, hint);
            warn!(
                url,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient fetch failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_request_error(url, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            return Err(FetchError::Transient {
                url: url.to_string(),
                reason: "429 Too Many Requests".to_string(),
                retry_after,
            });
        }
        if status.is_server_error() {
            return Err(FetchError::Transient {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
                retry_after: None,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(url, e))?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "fetched");

        Ok(FetchResponse {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

fn classify_request_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        FetchError::Transient {
            url: url.to_string(),
            reason: e.to_string(),
            retry_after: None,
        }
    } else {
        FetchError::Permanent {
            url: url.to_string(),
            status: e.status().map(|s| s.as_u16()),
            reason: e.to_string(),
        }
    }
}

/// `Retry-After` is either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
