use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use crate::error::AppError;
use crate::models::{RunBatch, ScrapedRecord};

/// Issues a single HTTP GET and returns the response body.
///
/// Implementations do no retrying or pacing of their own; that is layered on
/// by [`RateLimitedFetcher`](crate::throttle::RateLimitedFetcher).
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Turns raw HTML into a structured record.
pub trait ContentExtractor: Send + Sync + Clone {
    fn extract(&self, html: &str, url: &str) -> Result<ScrapedRecord, AppError>;
}

/// Persists a finished batch and its textual report.
pub trait ResultSink: Send + Sync + Clone {
    /// Write the batch. Returns file type → path of every file written.
    fn save(&self, batch: &RunBatch) -> Result<BTreeMap<String, PathBuf>, AppError>;

    /// Write a human-readable run report and return its path.
    fn report(&self, batch: &RunBatch) -> Result<PathBuf, AppError>;

    /// Archive the raw HTML of one page. `Ok(None)` when archiving is off.
    fn save_html(
        &self,
        _url: &str,
        _html: &str,
        _record_id: &str,
    ) -> Result<Option<PathBuf>, AppError> {
        Ok(None)
    }
}

/// A sink that writes nothing, for dry runs and tests.
#[derive(Debug, Clone)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn save(&self, _batch: &RunBatch) -> Result<BTreeMap<String, PathBuf>, AppError> {
        Ok(BTreeMap::new())
    }

    fn report(&self, _batch: &RunBatch) -> Result<PathBuf, AppError> {
        Ok(PathBuf::new())
    }
}
