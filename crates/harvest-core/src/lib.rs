pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod throttle;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classifier::UrlClassifier;
pub use config::{OutputFormat, ScraperConfig, load_config};
pub use error::AppError;
pub use models::{
    DryRunSummary, FetchErrorKind, FetchOutcome, FullRunSummary, RunBatch, ScrapeTarget,
    ScrapedRecord, Section, compute_hash, stable_record_id,
};
pub use orchestrator::{RunEvent, RunReporter, ScrapeOrchestrator, TracingRunReporter};
pub use retry::{RetryPolicy, with_retry, with_timeout};
pub use throttle::{HostBreakers, RateLimitedFetcher, RateLimiter};
pub use traits::{ContentExtractor, Fetcher, NullSink, ResultSink};
