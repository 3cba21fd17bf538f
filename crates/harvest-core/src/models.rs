use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::AppError;

/// A validated absolute `http`/`https` URL with a non-empty host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget(Url);

impl ScrapeTarget {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let url = Url::parse(raw).map_err(|e| AppError::Validation(format!("invalid URL: {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::Validation(format!(
                    "invalid URL: scheme '{scheme}' is not allowed (only http/https)"
                )));
            }
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(AppError::Validation("invalid URL: missing host".into()));
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }
}

impl fmt::Display for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a fetch ended without a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Every attempt failed (status, network or timeout).
    FetchFailed,
    /// The circuit breaker refused the call.
    CircuitOpen,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::FetchFailed => "fetch_failed",
            FetchErrorKind::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one logical fetch, after rate limiting and retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched {
        body: String,
        source_url: String,
    },
    Failed {
        source_url: String,
        kind: FetchErrorKind,
        message: String,
    },
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched { .. })
    }
}

/// A titled block of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub text: String,
}

/// The unit of output: one per final-page URL.
///
/// `error` is set exactly when fetching or extraction failed, in which case
/// every content field is empty and only `url` and `scraped_at` carry data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedRecord {
    pub id: Option<String>,
    pub title: Option<String>,
    pub url: String,
    pub text: Option<String>,
    pub sections: Vec<Section>,
    pub metadata: BTreeMap<String, String>,
    pub scraped_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapedRecord {
    /// An empty successful record for `url`, stamped now.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: None,
            title: None,
            url: url.into(),
            text: None,
            sections: Vec::new(),
            metadata: BTreeMap::new(),
            scraped_at: Utc::now(),
            error: None,
        }
    }

    /// The failure shape: only `url`, `scraped_at` and `error` populated.
    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(url)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// All records produced by one dry-run or full-run invocation.
///
/// `records` are in completion order, not input order.
#[derive(Debug, Clone, Serialize)]
pub struct RunBatch {
    pub run_id: String,
    pub records: Vec<ScrapedRecord>,
    pub total_input: usize,
    pub final_page_count: usize,
}

impl RunBatch {
    pub fn successful_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.records.len() - self.successful_count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScrapedRecord> {
        self.records.iter().filter(|r| !r.is_success())
    }

    /// Percentage of successful records, 0.0 for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.successful_count() as f64 * 100.0 / self.records.len() as f64
        }
    }
}

/// Summary returned by a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunSummary {
    pub total_urls: usize,
    pub final_page_urls: usize,
    pub sample_scraped: usize,
    pub successful_samples: usize,
    pub sample_data: Vec<ScrapedRecord>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Summary returned by a full run.
#[derive(Debug, Clone, Serialize)]
pub struct FullRunSummary {
    pub run_id: String,
    pub total_urls: usize,
    pub final_page_urls: usize,
    pub scraped_records: usize,
    pub successful_scrapes: usize,
    pub saved_files: BTreeMap<String, PathBuf>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl FullRunSummary {
    /// Percentage of successful scrapes, 0.0 when nothing was scraped.
    pub fn success_rate(&self) -> f64 {
        if self.scraped_records == 0 {
            0.0
        } else {
            self.successful_scrapes as f64 * 100.0 / self.scraped_records as f64
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fallback record id derived from the URL; identical across processes.
pub fn stable_record_id(url: &str) -> String {
    compute_hash(url)[..16].to_string()
}
