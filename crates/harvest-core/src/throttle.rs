//! Request pacing and the resilient fetch path.
//!
//! [`RateLimiter`] spaces out the *start* of consecutive requests. One limiter
//! is shared by every worker through [`RateLimitedFetcher`], so the aggregate
//! request rate stays at roughly `concurrency_level` requests per second no
//! matter how many workers are running.
//!
//! [`RateLimitedFetcher`] layers, from the outside in:
//! per-host circuit breaker (optional) → retry with backoff → rate limit →
//! timeout → raw fetch. It never returns an error: failures become
//! [`FetchOutcome::Failed`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
use crate::config::ScraperConfig;
use crate::error::AppError;
use crate::models::{FetchErrorKind, FetchOutcome, ScrapeTarget};
use crate::retry::{RetryPolicy, with_retry, with_timeout};
use crate::traits::Fetcher;

/// Enforces a minimum spacing between request starts.
#[derive(Clone)]
pub struct RateLimiter {
    spacing: Duration,
    /// Start time handed to the most recent caller.
    last_start: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last_start: Arc::new(Mutex::new(None)),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Wait for this caller's slot.
    ///
    /// The slot is reserved under the lock and the lock is released before
    /// sleeping, so concurrent callers queue up one spacing apart instead of
    /// observing the same elapsed window.
    pub async fn acquire(&self) {
        let slot = {
            let mut last = self.last_start.lock().await;
            let now = Instant::now();
            let slot = match *last {
                Some(prev) => (prev + self.spacing).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };

        if slot > Instant::now() {
            tracing::debug!(
                sleep_ms = %(slot - Instant::now()).as_millis(),
                "Rate limiting request"
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}

/// One circuit breaker per host, created on first use. Clones share the map.
#[derive(Clone)]
pub struct HostBreakers {
    config: CircuitBreakerConfig,
    breakers: Arc<std::sync::Mutex<HashMap<String, CircuitBreaker>>>,
}

impl HostBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Breaker guarding the host of `url`.
    pub fn for_url(&self, url: &str) -> CircuitBreaker {
        let host = ScrapeTarget::parse(url)
            .map(|target| target.host().to_string())
            .unwrap_or_default();

        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(host)
            .or_insert_with_key(|host| {
                CircuitBreaker::new(format!("fetch:{host}"), self.config.clone())
            })
            .clone()
    }

    /// Stats of every breaker that is not closed, ordered by name.
    pub fn tripped(&self) -> Vec<CircuitBreakerStats> {
        let mut tripped: Vec<_> = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(CircuitBreaker::stats)
            .filter(|stats| stats.state != CircuitState::Closed)
            .collect();
        tripped.sort_by(|a, b| a.name.cmp(&b.name));
        tripped
    }
}

/// Fetch path shared by all workers of a run.
#[derive(Clone)]
pub struct RateLimitedFetcher<F> {
    inner: F,
    limiter: RateLimiter,
    retry: RetryPolicy,
    request_timeout: Duration,
    breakers: Option<HostBreakers>,
}

impl<F: Fetcher> RateLimitedFetcher<F> {
    pub fn new(inner: F, limiter: RateLimiter, retry: RetryPolicy, request_timeout: Duration) -> Self {
        Self {
            inner,
            limiter,
            retry,
            request_timeout,
            breakers: None,
        }
    }

    /// Build from run configuration: spacing `1/concurrency_level`, the
    /// configured retry policy and timeout, and per-host breakers when enabled.
    pub fn from_config(inner: F, config: &ScraperConfig) -> Self {
        let fetcher = Self::new(
            inner,
            RateLimiter::new(config.request_spacing()),
            config.retry_policy(),
            config.request_timeout(),
        );

        if config.circuit_breaker.enabled {
            fetcher.with_host_breakers(HostBreakers::new(config.circuit_breaker.to_config()))
        } else {
            fetcher
        }
    }

    pub fn with_host_breakers(mut self, breakers: HostBreakers) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Breakers left open or half-open; empty when breakers are disabled.
    pub fn tripped_circuits(&self) -> Vec<CircuitBreakerStats> {
        self.breakers
            .as_ref()
            .map(HostBreakers::tripped)
            .unwrap_or_default()
    }

    /// Fetch `url`, converting every failure into [`FetchOutcome::Failed`].
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let result = match &self.breakers {
            Some(breakers) => {
                let breaker = breakers.for_url(url);
                breaker
                    .call(|| self.fetch_with_retry(url))
                    .await
                    .map_err(AppError::from)
            }
            None => self.fetch_with_retry(url).await,
        };

        match result {
            Ok(body) => {
                tracing::debug!(url = %url, bytes = body.len(), "Fetched");
                FetchOutcome::Fetched {
                    body,
                    source_url: url.to_string(),
                }
            }
            Err(e) => {
                let kind = match e {
                    AppError::CircuitOpen { .. } => FetchErrorKind::CircuitOpen,
                    _ => FetchErrorKind::FetchFailed,
                };
                tracing::warn!(url = %url, kind = %kind, error = %e, "Fetch failed");
                FetchOutcome::Failed {
                    source_url: url.to_string(),
                    kind,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<String, AppError> {
        with_retry(&self.retry, || async move {
            self.limiter.acquire().await;
            tracing::debug!(url = %url, "Making request");
            with_timeout(self.request_timeout, self.inner.fetch(url)).await
        })
        .await
    }
}
