use std::fmt::Write;

use chrono::{DateTime, Utc};
use harvest_core::config::OutputFormat;
use harvest_core::models::RunBatch;

/// Failed URLs listed individually before the rest are summarized.
pub const MAX_LISTED_FAILURES: usize = 10;

/// Run settings echoed into the report.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub concurrency_level: usize,
    pub max_retries: u32,
    pub output_format: OutputFormat,
    pub save_html: bool,
}

/// Render the plain-text run report.
pub fn render_report(batch: &RunBatch, settings: &ReportSettings, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let failures: Vec<_> = batch.failures().collect();

    // Writing to a String cannot fail.
    let _ = write!(
        out,
        "Harvest Scraping Report\n\
         =======================\n\
         Run ID: {run_id}\n\
         Timestamp: {timestamp}\n\
         \n\
         Summary:\n\
         --------\n\
         Total URLs processed: {total}\n\
         Successful scrapes: {successful}\n\
         Failed scrapes: {failed}\n\
         Success rate: {rate:.1}%\n\
         \n\
         Configuration:\n\
         --------------\n\
         Concurrency level: {concurrency}\n\
         Max retries: {retries}\n\
         Output format: {format}\n\
         Save HTML: {save_html}\n\
         \n\
         Failed URLs:\n\
         ------------\n",
        run_id = batch.run_id,
        timestamp = now.to_rfc3339(),
        total = batch.records.len(),
        successful = batch.successful_count(),
        failed = failures.len(),
        rate = batch.success_rate(),
        concurrency = settings.concurrency_level,
        retries = settings.max_retries,
        format = settings.output_format,
        save_html = settings.save_html,
    );

    for record in failures.iter().take(MAX_LISTED_FAILURES) {
        let _ = writeln!(
            out,
            "- {}: {}",
            record.url,
            record.error.as_deref().unwrap_or("Unknown error")
        );
    }
    if failures.len() > MAX_LISTED_FAILURES {
        let _ = writeln!(
            out,
            "... and {} more failures",
            failures.len() - MAX_LISTED_FAILURES
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use harvest_core::models::ScrapedRecord;

    use super::*;

    fn settings() -> ReportSettings {
        ReportSettings {
            concurrency_level: 3,
            max_retries: 2,
            output_format: OutputFormat::Both,
            save_html: false,
        }
    }

    fn batch(ok: usize, failed: usize) -> RunBatch {
        let mut records = Vec::new();
        for i in 0..ok {
            records.push(ScrapedRecord::new(format!("https://x/rule/{i}")));
        }
        for i in 0..failed {
            records.push(ScrapedRecord::failed(
                format!("https://x/document/{i}"),
                format!("HTTP 500 #{i}"),
            ));
        }
        RunBatch {
            run_id: "20240101_120000".into(),
            total_input: ok + failed,
            final_page_count: ok + failed,
            records,
        }
    }

    #[test]
    fn test_report_summary_and_settings() {
        let text = render_report(&batch(3, 1), &settings(), Utc::now());
        assert!(text.contains("Run ID: 20240101_120000"));
        assert!(text.contains("Total URLs processed: 4"));
        assert!(text.contains("Successful scrapes: 3"));
        assert!(text.contains("Failed scrapes: 1"));
        assert!(text.contains("Success rate: 75.0%"));
        assert!(text.contains("Concurrency level: 3"));
        assert!(text.contains("Output format: both"));
        assert!(text.contains("Save HTML: false"));
        assert!(text.contains("- https://x/document/0: HTTP 500 #0"));
        assert!(!text.contains("more failures"));
    }

    #[test]
    fn test_report_caps_failure_list() {
        let text = render_report(&batch(0, 13), &settings(), Utc::now());
        assert_eq!(text.lines().filter(|l| l.starts_with("- ")).count(), 10);
        assert!(text.contains("- https://x/document/9:"));
        assert!(!text.contains("- https://x/document/10:"));
        assert!(text.contains("... and 3 more failures"));
    }

    #[test]
    fn test_report_empty_batch() {
        let text = render_report(&batch(0, 0), &settings(), Utc::now());
        assert!(text.contains("Success rate: 0.0%"));
    }
}
