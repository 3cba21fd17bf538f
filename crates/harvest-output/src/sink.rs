use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harvest_core::config::{OutputFormat, ScraperConfig};
use harvest_core::error::AppError;
use harvest_core::models::{RunBatch, ScrapedRecord, stable_record_id};
use harvest_core::traits::ResultSink;
use serde::Serialize;

use crate::flatten::{FlatRow, flatten_record, header};
use crate::report::{ReportSettings, render_report};

#[derive(Serialize)]
struct BatchMetadata<'a> {
    run_id: &'a str,
    timestamp: DateTime<Utc>,
    total_records: usize,
    successful_scrapes: usize,
    failed_scrapes: usize,
}

#[derive(Serialize)]
struct BatchFile<'a> {
    metadata: BatchMetadata<'a>,
    data: &'a [ScrapedRecord],
}

fn sink_error(path: &Path, e: impl std::fmt::Display) -> AppError {
    AppError::SinkError(format!("failed to write {}: {e}", path.display()))
}

/// Writes batches, reports and raw HTML under one output folder.
///
/// The folder (and its `html/` subfolder) is created on first write.
#[derive(Debug, Clone)]
pub struct FileSink {
    folder: PathBuf,
    format: OutputFormat,
    save_html: bool,
    settings: ReportSettings,
}

impl FileSink {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            folder: config.output.folder.clone(),
            format: config.output.format,
            save_html: config.save_html,
            settings: ReportSettings {
                concurrency_level: config.concurrency_level,
                max_retries: config.max_retries,
                output_format: config.output.format,
                save_html: config.save_html,
            },
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn ensure_dir(dir: &Path) -> Result<(), AppError> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::SinkError(format!("failed to create {}: {e}", dir.display()))
        })
    }

    fn write_json(&self, batch: &RunBatch) -> Result<PathBuf, AppError> {
        let path = self
            .folder
            .join(format!("scraped_data_{}.json", batch.run_id));
        let file = BatchFile {
            metadata: BatchMetadata {
                run_id: &batch.run_id,
                timestamp: Utc::now(),
                total_records: batch.records.len(),
                successful_scrapes: batch.successful_count(),
                failed_scrapes: batch.failed_count(),
            },
            data: &batch.records,
        };

        let mut writer = BufWriter::new(File::create(&path).map_err(|e| sink_error(&path, e))?);
        serde_json::to_writer_pretty(&mut writer, &file).map_err(|e| sink_error(&path, e))?;
        writer.flush().map_err(|e| sink_error(&path, e))?;

        tracing::info!(path = %path.display(), records = batch.records.len(), "Saved JSON data");
        Ok(path)
    }

    fn write_csv(&self, batch: &RunBatch) -> Result<PathBuf, AppError> {
        let path = self.folder.join(format!("scraped_data_{}.csv", batch.run_id));
        let rows = batch
            .records
            .iter()
            .map(flatten_record)
            .collect::<Result<Vec<FlatRow>, _>>()?;
        let columns = header(&rows);

        let mut writer = csv::Writer::from_path(&path).map_err(|e| sink_error(&path, e))?;
        writer
            .write_record(&columns)
            .map_err(|e| sink_error(&path, e))?;
        for row in &rows {
            let cells = columns
                .iter()
                .map(|c| row.get(c).map(String::as_str).unwrap_or_default());
            writer
                .write_record(cells)
                .map_err(|e| sink_error(&path, e))?;
        }
        writer.flush().map_err(|e| sink_error(&path, e))?;

        tracing::info!(path = %path.display(), records = rows.len(), "Saved CSV data");
        Ok(path)
    }
}

impl ResultSink for FileSink {
    fn save(&self, batch: &RunBatch) -> Result<BTreeMap<String, PathBuf>, AppError> {
        let mut saved = BTreeMap::new();
        if batch.records.is_empty() {
            tracing::warn!(run_id = %batch.run_id, "No data to save");
            return Ok(saved);
        }

        Self::ensure_dir(&self.folder)?;
        if self.format.writes_json() {
            saved.insert("json".to_string(), self.write_json(batch)?);
        }
        if self.format.writes_csv() {
            saved.insert("csv".to_string(), self.write_csv(batch)?);
        }

        tracing::info!(
            records = batch.records.len(),
            files = saved.len(),
            "Saved batch"
        );
        Ok(saved)
    }

    fn report(&self, batch: &RunBatch) -> Result<PathBuf, AppError> {
        Self::ensure_dir(&self.folder)?;
        let path = self
            .folder
            .join(format!("scraping_report_{}.txt", batch.run_id));
        let text = render_report(batch, &self.settings, Utc::now());
        fs::write(&path, text).map_err(|e| sink_error(&path, e))?;

        tracing::info!(path = %path.display(), "Generated summary report");
        Ok(path)
    }

    fn save_html(
        &self,
        url: &str,
        html: &str,
        record_id: &str,
    ) -> Result<Option<PathBuf>, AppError> {
        if !self.save_html {
            return Ok(None);
        }

        let dir = self.folder.join("html");
        Self::ensure_dir(&dir)?;

        let mut safe_id: String = record_id
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
            .collect();
        if safe_id.is_empty() {
            safe_id = stable_record_id(url);
        }

        let path = dir.join(format!("{safe_id}.html"));
        let content = format!(
            "<!-- Source URL: {url} -->\n<!-- Scraped at: {} -->\n{html}",
            Utc::now().to_rfc3339()
        );
        fs::write(&path, content).map_err(|e| sink_error(&path, e))?;

        tracing::debug!(%record_id, path = %path.display(), "Saved HTML");
        Ok(Some(path))
    }
}
