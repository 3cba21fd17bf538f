use std::sync::Arc;
use std::time::Duration;

use harvest_core::config::ScraperConfig;
use harvest_core::error::AppError;
use harvest_core::traits::Fetcher;
use rand::seq::SliceRandom;
use reqwest::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};

/// HTTP fetcher using reqwest.
///
/// One GET per call with browser-like default headers, a fixed timeout and a
/// `User-Agent` picked at random from the configured list on every request.
/// Retries, pacing and circuit breaking are layered on top by
/// [`RateLimitedFetcher`](harvest_core::throttle::RateLimitedFetcher).
#[derive(Clone, Debug)]
pub struct ReqwestFetcher {
    client: Client,
    user_agents: Arc<[String]>,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(user_agents: Vec<String>, timeout: Duration) -> Result<Self, AppError> {
        if user_agents.is_empty() {
            return Err(AppError::Validation("user_agents cannot be empty".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            user_agents: user_agents.into(),
            timeout,
        })
    }

    pub fn from_config(config: &ScraperConfig) -> Result<Self, AppError> {
        Self::new(config.user_agents.clone(), config.request_timeout())
    }

    fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let user_agent = self.pick_user_agent().to_string();
        tracing::debug!(%url, %user_agent, "GET");

        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })
    }
}
