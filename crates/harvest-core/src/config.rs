//! Run configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! usable configuration once `start_urls` is filled in.
//!
//! ```toml
//! start_urls = ["https://example.com/rule/1"]
//! concurrency_level = 4
//! max_retries = 2
//! retry_delay = 0.5
//!
//! [output]
//! folder = "out"
//! format = "both"
//!
//! [circuit_breaker]
//! enabled = true
//! failure_threshold = 10
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::retry::{MAX_BACKOFF, RetryPolicy};

pub const DEFAULT_FINAL_PAGE_PATTERNS: &[&str] =
    &[r"/rule/\d+", r"/regulation/\d+", r"/document/\d+"];

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
];

/// Which batch files the sink writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Both,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Both => "both",
        }
    }

    pub fn writes_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }

    pub fn writes_csv(&self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Both)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "both" => Ok(OutputFormat::Both),
            _ => Err(format!("output format must be 'json', 'csv', or 'both', got '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub folder: PathBuf,
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("data"),
            format: OutputFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    /// Seconds to stay open before allowing a trial call.
    pub recovery_timeout: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            recovery_timeout: 60,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout),
        }
    }
}

/// Read-only settings for one scrape run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub start_urls: Vec<String>,
    pub final_page_patterns: Vec<String>,
    pub concurrency_level: usize,
    pub max_retries: u32,
    /// Base backoff delay in seconds.
    pub retry_delay: f64,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
    pub user_agents: Vec<String>,
    pub save_html: bool,
    pub log_level: String,
    pub output: OutputConfig,
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            start_urls: Vec::new(),
            final_page_patterns: DEFAULT_FINAL_PAGE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            concurrency_level: 3,
            max_retries: 3,
            retry_delay: 1.0,
            request_timeout: 30,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            save_html: true,
            log_level: "info".to_string(),
            output: OutputConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl ScraperConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.start_urls.is_empty() {
            return Err(AppError::Validation("start_urls cannot be empty".into()));
        }
        self.validate_settings()
    }

    /// Everything [`validate`](Self::validate) checks except `start_urls`,
    /// for runs whose URLs are supplied per call.
    pub fn validate_settings(&self) -> Result<(), AppError> {
        if self.concurrency_level < 1 {
            return Err(AppError::Validation(
                "concurrency_level must be >= 1".into(),
            ));
        }
        if Duration::try_from_secs_f64(self.retry_delay).is_err() {
            return Err(AppError::Validation(format!(
                "retry_delay must be a non-negative number of seconds, got {}",
                self.retry_delay
            )));
        }
        if self.request_timeout == 0 {
            return Err(AppError::Validation("request_timeout must be >= 1".into()));
        }
        if self.user_agents.is_empty() {
            return Err(AppError::Validation("user_agents cannot be empty".into()));
        }
        if self.circuit_breaker.enabled && self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::Validation(
                "circuit_breaker.failure_threshold must be >= 1".into(),
            ));
        }
        for pattern in &self.final_page_patterns {
            Regex::new(pattern).map_err(|e| {
                AppError::Validation(format!("invalid final page pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base_delay = Duration::try_from_secs_f64(self.retry_delay).unwrap_or(MAX_BACKOFF);
        RetryPolicy::new(self.max_retries, base_delay.min(MAX_BACKOFF))
    }

    /// Minimum spacing between the starts of consecutive requests.
    pub fn request_spacing(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.concurrency_level.max(1) as f64)
    }
}

/// Load a configuration file. Validation is left to the caller, since CLI
/// overrides are usually applied first.
pub fn load_config(path: &Path) -> Result<ScraperConfig, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&content)
        .map_err(|e| AppError::Config(format!("failed to parse {}: {e}", path.display())))
}
