//! Run coordination: classify, dispatch to a fixed worker pool, collect.
//!
//! A run moves through `Idle → Dispatching → Collecting → Completed`. Every
//! final-page URL yields exactly one [`ScrapedRecord`]; per-URL failures are
//! data, never errors. Records are collected in completion order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::classifier::UrlClassifier;
use crate::config::ScraperConfig;
use crate::error::AppError;
use crate::models::{
    DryRunSummary, FetchOutcome, FullRunSummary, RunBatch, ScrapeTarget, ScrapedRecord,
    stable_record_id,
};
use crate::throttle::RateLimitedFetcher;
use crate::traits::{ContentExtractor, Fetcher, ResultSink};

/// Number of final URLs a dry run samples.
pub const DRY_RUN_SAMPLE_SIZE: usize = 3;

pub const NO_FINAL_PAGES: &str = "No final page URLs found";

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum RunEvent<'a> {
    Started {
        run_id: &'a str,
        total_urls: usize,
        dry_run: bool,
    },
    NoFinalPages {
        run_id: &'a str,
        total_urls: usize,
    },
    UrlRejected {
        url: &'a str,
        reason: &'a str,
    },
    Dispatching {
        run_id: &'a str,
        final_urls: usize,
        workers: usize,
    },
    RecordCollected {
        record: &'a ScrapedRecord,
        collected: usize,
        expected: usize,
    },
    Completed {
        run_id: &'a str,
        records: usize,
        successful: usize,
        dry_run: bool,
    },
}

/// Trait for receiving run events (decoupled logging).
pub trait RunReporter: Send + Sync {
    fn report(&self, event: RunEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunReporter;

impl RunReporter for TracingRunReporter {
    fn report(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::Started {
                run_id,
                total_urls,
                dry_run,
            } => {
                tracing::info!(%run_id, total_urls, dry_run, "Run started");
            }
            RunEvent::NoFinalPages { run_id, total_urls } => {
                tracing::warn!(%run_id, total_urls, "{}", NO_FINAL_PAGES);
            }
            RunEvent::UrlRejected { url, reason } => {
                tracing::warn!(%url, %reason, "Skipping invalid URL");
            }
            RunEvent::Dispatching {
                run_id,
                final_urls,
                workers,
            } => {
                tracing::info!(%run_id, final_urls, workers, "Dispatching final pages");
            }
            RunEvent::RecordCollected {
                record,
                collected,
                expected,
            } => match &record.error {
                None => {
                    tracing::info!(url = %record.url, collected, expected, "Scraped");
                }
                Some(error) => {
                    tracing::warn!(url = %record.url, %error, collected, expected, "Scrape failed");
                }
            },
            RunEvent::Completed {
                run_id,
                records,
                successful,
                dry_run,
            } => {
                tracing::info!(%run_id, records, successful, dry_run, "Run completed");
            }
        }
    }
}

/// Everything a worker task needs, cloned into each task.
#[derive(Clone)]
struct Worker<F, E, S> {
    fetcher: RateLimitedFetcher<F>,
    extractor: E,
    sink: S,
    archive_html: bool,
}

impl<F, E, S> Worker<F, E, S>
where
    F: Fetcher + 'static,
    E: ContentExtractor + 'static,
    S: ResultSink + 'static,
{
    /// Pull URLs until the queue is drained or the run is cancelled.
    async fn run(
        self,
        jobs: Arc<Mutex<mpsc::Receiver<String>>>,
        results: mpsc::UnboundedSender<ScrapedRecord>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(url) = jobs.lock().await.recv().await else {
                break;
            };

            let record = AssertUnwindSafe(self.scrape(&url))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(%url, %message, "Worker panicked");
                    ScrapedRecord::failed(url.as_str(), format!("worker panicked: {message}"))
                });

            if results.send(record).is_err() {
                break;
            }
        }
    }

    /// Fetch and extract one URL. Always yields a record.
    async fn scrape(&self, url: &str) -> ScrapedRecord {
        let (body, source_url) = match self.fetcher.fetch(url).await {
            FetchOutcome::Fetched { body, source_url } => (body, source_url),
            FetchOutcome::Failed {
                source_url,
                message,
                ..
            } => return ScrapedRecord::failed(source_url, message),
        };

        let record = match self.extractor.extract(&body, &source_url) {
            Ok(record) => normalize(record, &source_url),
            Err(e) => {
                tracing::warn!(url = %source_url, error = %e, "Extraction failed");
                return ScrapedRecord::failed(source_url, e.to_string());
            }
        };

        if self.archive_html && record.is_success() {
            let id = record.id.clone().unwrap_or_default();
            self.archive(&source_url, body, id).await;
        }

        record
    }

    /// Hand the page to the sink on the blocking pool. Failures are logged,
    /// never recorded.
    async fn archive(&self, url: &str, html: String, record_id: String) {
        let sink = self.sink.clone();
        let page_url = url.to_string();
        let saved =
            tokio::task::spawn_blocking(move || sink.save_html(&page_url, &html, &record_id))
                .await;

        match saved {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(%url, error = %e, "Failed to archive HTML"),
            Err(e) => tracing::warn!(%url, error = %e, "HTML archive task failed"),
        }
    }
}

/// Pin the record to its source URL, enforce the failure shape and fill in
/// a stable id.
fn normalize(mut record: ScrapedRecord, source_url: &str) -> ScrapedRecord {
    if let Some(error) = record.error.take() {
        return ScrapedRecord::failed(source_url, error);
    }
    record.url = source_url.to_string();
    if record.id.as_deref().is_none_or(str::is_empty) {
        record.id = Some(stable_record_id(source_url));
    }
    record
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn new_run_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Coordinates dry runs and full runs over the injected collaborators.
pub struct ScrapeOrchestrator<F, E, S> {
    config: ScraperConfig,
    classifier: UrlClassifier,
    fetcher: RateLimitedFetcher<F>,
    extractor: E,
    sink: S,
    reporter: Arc<dyn RunReporter>,
    cancel: CancellationToken,
}

impl<F, E, S> ScrapeOrchestrator<F, E, S>
where
    F: Fetcher + 'static,
    E: ContentExtractor + 'static,
    S: ResultSink + 'static,
{
    /// Validates the run settings and wires the resilient fetch path.
    ///
    /// `start_urls` may be empty here; URLs can be supplied per run.
    pub fn new(config: ScraperConfig, fetcher: F, extractor: E, sink: S) -> Result<Self, AppError> {
        config.validate_settings()?;
        let classifier = UrlClassifier::new(&config.final_page_patterns)?;
        let fetcher = RateLimitedFetcher::from_config(fetcher, &config);

        Ok(Self {
            config,
            classifier,
            fetcher,
            extractor,
            sink,
            reporter: Arc::new(TracingRunReporter),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Once `token` is cancelled, workers finish their current URL and stop.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn classifier(&self) -> &UrlClassifier {
        &self.classifier
    }

    /// Scrape a sample of the final pages without writing anything.
    pub async fn run_dry_run(&self, urls: Option<Vec<String>>) -> Result<DryRunSummary, AppError> {
        let urls = self.resolve_urls(urls)?;
        let run_id = new_run_id();
        self.reporter.report(RunEvent::Started {
            run_id: &run_id,
            total_urls: urls.len(),
            dry_run: true,
        });

        let final_urls = self.classifier.filter_final_pages(&urls);
        if final_urls.is_empty() {
            self.reporter.report(RunEvent::NoFinalPages {
                run_id: &run_id,
                total_urls: urls.len(),
            });
            return Ok(DryRunSummary {
                total_urls: urls.len(),
                final_page_urls: 0,
                sample_scraped: 0,
                successful_samples: 0,
                sample_data: Vec::new(),
                dry_run: true,
                errors: vec![NO_FINAL_PAGES.to_string()],
            });
        }

        let sample: Vec<String> = final_urls
            .iter()
            .take(DRY_RUN_SAMPLE_SIZE)
            .cloned()
            .collect();
        let batch = self
            .collect(run_id, sample, urls.len(), final_urls.len(), false)
            .await;

        self.reporter.report(RunEvent::Completed {
            run_id: &batch.run_id,
            records: batch.records.len(),
            successful: batch.successful_count(),
            dry_run: true,
        });

        Ok(DryRunSummary {
            total_urls: urls.len(),
            final_page_urls: final_urls.len(),
            sample_scraped: batch.records.len(),
            successful_samples: batch.successful_count(),
            sample_data: batch.records,
            dry_run: true,
            errors: Vec::new(),
        })
    }

    /// Scrape every final page, then save the batch and write the report.
    ///
    /// Sink failures are returned after the batch has been collected.
    pub async fn run_full_scrape(
        &self,
        urls: Option<Vec<String>>,
    ) -> Result<FullRunSummary, AppError> {
        let urls = self.resolve_urls(urls)?;
        let run_id = new_run_id();
        self.reporter.report(RunEvent::Started {
            run_id: &run_id,
            total_urls: urls.len(),
            dry_run: false,
        });

        let final_urls = self.classifier.filter_final_pages(&urls);
        if final_urls.is_empty() {
            self.reporter.report(RunEvent::NoFinalPages {
                run_id: &run_id,
                total_urls: urls.len(),
            });
            return Ok(FullRunSummary {
                run_id,
                total_urls: urls.len(),
                final_page_urls: 0,
                scraped_records: 0,
                successful_scrapes: 0,
                saved_files: Default::default(),
                dry_run: false,
                errors: vec![NO_FINAL_PAGES.to_string()],
            });
        }

        let final_count = final_urls.len();
        let batch = self
            .collect(run_id, final_urls, urls.len(), final_count, self.config.save_html)
            .await;

        let mut saved_files = self.sink.save(&batch)?;
        let report = self.sink.report(&batch)?;
        saved_files.insert("report".to_string(), report);

        self.reporter.report(RunEvent::Completed {
            run_id: &batch.run_id,
            records: batch.records.len(),
            successful: batch.successful_count(),
            dry_run: false,
        });

        Ok(FullRunSummary {
            run_id: batch.run_id.clone(),
            total_urls: urls.len(),
            final_page_urls: final_count,
            scraped_records: batch.records.len(),
            successful_scrapes: batch.successful_count(),
            saved_files,
            dry_run: false,
            errors: Vec::new(),
        })
    }

    /// Per-call URLs win; an absent or empty list falls back to `start_urls`.
    fn resolve_urls(&self, urls: Option<Vec<String>>) -> Result<Vec<String>, AppError> {
        let urls = urls
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.config.start_urls.clone());
        if urls.is_empty() {
            return Err(AppError::Validation("No URLs provided".into()));
        }
        Ok(urls)
    }

    /// Dispatch `targets` to the worker pool and block until every dispatched
    /// URL has produced a record.
    async fn collect(
        &self,
        run_id: String,
        targets: Vec<String>,
        total_input: usize,
        final_page_count: usize,
        archive_html: bool,
    ) -> RunBatch {
        let mut records = Vec::with_capacity(targets.len());
        let expected = targets.len();

        let mut valid = Vec::with_capacity(targets.len());
        for url in targets {
            match ScrapeTarget::parse(&url) {
                Ok(target) => valid.push(target.as_str().to_string()),
                Err(e) => {
                    let reason = e.to_string();
                    self.reporter.report(RunEvent::UrlRejected {
                        url: &url,
                        reason: &reason,
                    });
                    records.push(ScrapedRecord::failed(url, reason));
                }
            }
        }

        let workers = self.config.concurrency_level.min(valid.len());
        self.reporter.report(RunEvent::Dispatching {
            run_id: &run_id,
            final_urls: expected,
            workers,
        });

        if workers > 0 {
            let (job_tx, job_rx) = mpsc::channel(valid.len());
            for url in valid {
                // Capacity matches the job count, so this never waits.
                let _ = job_tx.send(url).await;
            }
            drop(job_tx);

            let jobs = Arc::new(Mutex::new(job_rx));
            let (result_tx, mut result_rx) = mpsc::unbounded_channel();
            let worker = Worker {
                fetcher: self.fetcher.clone(),
                extractor: self.extractor.clone(),
                sink: self.sink.clone(),
                archive_html,
            };

            let mut pool = JoinSet::new();
            for _ in 0..workers {
                pool.spawn(worker.clone().run(
                    jobs.clone(),
                    result_tx.clone(),
                    self.cancel.clone(),
                ));
            }
            drop(result_tx);

            while let Some(record) = result_rx.recv().await {
                self.reporter.report(RunEvent::RecordCollected {
                    record: &record,
                    collected: records.len() + 1,
                    expected,
                });
                records.push(record);
            }

            while let Some(joined) = pool.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Worker task failed");
                }
            }
        }

        for stats in self.fetcher.tripped_circuits() {
            tracing::warn!(
                %run_id,
                circuit = %stats.name,
                state = %stats.state,
                failures = stats.consecutive_failures,
                last_error = stats.last_error.as_deref().unwrap_or_default(),
                retry_after = ?stats.time_until_half_open,
                "Circuit breaker not closed at end of run"
            );
        }

        if records.len() < expected {
            tracing::warn!(
                %run_id,
                collected = records.len(),
                expected,
                "Run cancelled before all URLs were scraped"
            );
        }

        RunBatch {
            run_id,
            records,
            total_input,
            final_page_count,
        }
    }
}
