//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;
use crate::models::{RunBatch, ScrapedRecord};
use crate::orchestrator::{RunEvent, RunReporter};
use crate::traits::{ContentExtractor, Fetcher, ResultSink};

type ErrorFactory = Arc<dyn Fn() -> AppError + Send + Sync>;

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with scripted, per-URL and default responses.
///
/// Lookup order per call: a URL registered with `failing_for` always fails;
/// then the scripted queue (`with_responses`) is popped; otherwise the
/// default body. Every call is recorded with its start time.
#[derive(Clone)]
pub struct MockFetcher {
    default_body: String,
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    failures: Arc<Mutex<HashMap<String, ErrorFactory>>>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self {
            default_body: html.to_string(),
            responses: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        let fetcher = Self::new("<html><body>default</body></html>");
        *fetcher.responses.lock().unwrap() = responses;
        fetcher
    }

    /// Every fetch of `url` fails with a fresh error from `make_error`.
    pub fn failing_for(
        self,
        url: &str,
        make_error: impl Fn() -> AppError + Send + Sync + 'static,
    ) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), Arc::new(make_error));
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    /// Start times of every call, in call order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn respond(&self, url: &str) -> Result<String, AppError> {
        if let Some(make_error) = self.failures.lock().unwrap().get(url) {
            return Err(make_error());
        }
        let mut responses = self.responses.lock().unwrap();
        if !responses.is_empty() {
            return responses.remove(0);
        }
        Ok(self.default_body.clone())
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.respond(url)
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor: records with a fixed title, or an error for chosen URLs.
#[derive(Clone)]
pub struct MockExtractor {
    title: String,
    failing_urls: Arc<Mutex<Vec<String>>>,
    panicking_urls: Arc<Mutex<Vec<String>>>,
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl MockExtractor {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            failing_urls: Arc::new(Mutex::new(Vec::new())),
            panicking_urls: Arc::new(Mutex::new(Vec::new())),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_for(self, url: &str) -> Self {
        self.failing_urls.lock().unwrap().push(url.to_string());
        self
    }

    pub fn panicking_for(self, url: &str) -> Self {
        self.panicking_urls.lock().unwrap().push(url.to_string());
        self
    }
}

impl ContentExtractor for MockExtractor {
    fn extract(&self, html: &str, url: &str) -> Result<ScrapedRecord, AppError> {
        self.seen.lock().unwrap().push(url.to_string());

        if self.panicking_urls.lock().unwrap().iter().any(|u| u == url) {
            panic!("extractor blew up on {url}");
        }
        if self.failing_urls.lock().unwrap().iter().any(|u| u == url) {
            return Err(AppError::ExtractionError(format!("malformed page at {url}")));
        }

        let mut record = ScrapedRecord::new(url);
        record.title = Some(self.title.clone());
        record.text = Some(html.to_string());
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Mock sink that records batches and archived pages.
#[derive(Clone, Default)]
pub struct MockSink {
    pub saved: Arc<Mutex<Vec<RunBatch>>>,
    pub reported: Arc<Mutex<Vec<String>>>,
    pub html: Arc<Mutex<Vec<(String, String)>>>,
    save_error: Arc<Mutex<Option<AppError>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_error(error: AppError) -> Self {
        let sink = Self::default();
        *sink.save_error.lock().unwrap() = Some(error);
        sink
    }
}

impl ResultSink for MockSink {
    fn save(&self, batch: &RunBatch) -> Result<BTreeMap<String, PathBuf>, AppError> {
        if let Some(e) = self.save_error.lock().unwrap().take() {
            return Err(e);
        }
        self.saved.lock().unwrap().push(batch.clone());
        Ok(BTreeMap::from([(
            "json".to_string(),
            PathBuf::from(format!("scraped_data_{}.json", batch.run_id)),
        )]))
    }

    fn report(&self, batch: &RunBatch) -> Result<PathBuf, AppError> {
        self.reported.lock().unwrap().push(batch.run_id.clone());
        Ok(PathBuf::from(format!("scraping_report_{}.txt", batch.run_id)))
    }

    fn save_html(
        &self,
        url: &str,
        _html: &str,
        record_id: &str,
    ) -> Result<Option<PathBuf>, AppError> {
        self.html
            .lock()
            .unwrap()
            .push((url.to_string(), record_id.to_string()));
        Ok(Some(PathBuf::from(format!("html/{record_id}.html"))))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock run reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl RunReporter for MockReporter {
    fn report(&self, event: RunEvent<'_>) {
        let label = match &event {
            RunEvent::Started { .. } => "Started",
            RunEvent::NoFinalPages { .. } => "NoFinalPages",
            RunEvent::UrlRejected { .. } => "UrlRejected",
            RunEvent::Dispatching { .. } => "Dispatching",
            RunEvent::RecordCollected { .. } => "RecordCollected",
            RunEvent::Completed { .. } => "Completed",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

pub fn urls(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
