use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_client::{HtmlExtractor, ReqwestFetcher};
use harvest_core::classifier::UrlClassifier;
use harvest_core::config::{ScraperConfig, load_config};
use harvest_core::models::{DryRunSummary, FullRunSummary};
use harvest_core::orchestrator::ScrapeOrchestrator;
use harvest_core::traits::NullSink;
use harvest_output::FileSink;

#[derive(Parser)]
#[command(name = "harvest", version, about = "Concurrent scraper for final content pages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a small sample of final pages without writing any files
    DryRun(RunArgs),

    /// Scrape every final page and write the batch and report
    Run(RunArgs),

    /// Show which URLs would be scraped, without fetching anything
    Classify(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "HARVEST_CONFIG", default_value = "harvest.toml")]
    config: PathBuf,

    /// URLs to scrape (overrides start_urls from the config file)
    #[arg(short, long, num_args = 1..)]
    urls: Vec<String>,

    /// Output directory (overrides the config file)
    #[arg(short, long, env = "HARVEST_OUTPUT")]
    output: Option<PathBuf>,

    /// Number of workers and requests per second
    #[arg(long, env = "HARVEST_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::DryRun(args) => {
            let config = prepare(&args)?;
            cmd_dry_run(config).await?;
        }
        Commands::Run(args) => {
            let config = prepare(&args)?;
            cmd_run(config).await?;
        }
        Commands::Classify(args) => {
            let config = prepare(&args)?;
            cmd_classify(&config)?;
        }
    }

    Ok(())
}

/// Load the config file, apply command-line overrides, set up logging and
/// validate the result.
fn prepare(args: &RunArgs) -> Result<ScraperConfig> {
    let loaded = read_config(&args.config)?;
    let found = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    apply_overrides(&mut config, args);

    init_tracing(&config.log_level);
    if !found {
        tracing::warn!(
            path = %args.config.display(),
            "Config file not found, using defaults"
        );
    }
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

fn apply_overrides(config: &mut ScraperConfig, args: &RunArgs) {
    if !args.urls.is_empty() {
        config.start_urls = args.urls.clone();
    }
    if let Some(output) = &args.output {
        config.output.folder = output.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency_level = concurrency;
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }
}

/// `None` when the file does not exist.
fn read_config(path: &Path) -> Result<Option<ScraperConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    load_config(path)
        .map(Some)
        .with_context(|| format!("Failed to load {}", path.display()))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel the returned token on Ctrl-C so in-flight pages finish and no new
/// ones start.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            signal_token.cancel();
        }
    });
    token
}

async fn cmd_dry_run(config: ScraperConfig) -> Result<()> {
    let fetcher = ReqwestFetcher::from_config(&config).context("Failed to create HTTP client")?;
    let extractor = HtmlExtractor::new()?;
    let orchestrator = ScrapeOrchestrator::new(config, fetcher, extractor, NullSink)?
        .with_cancellation(cancel_on_ctrl_c());

    println!("Running in dry-run mode...");
    let summary = orchestrator.run_dry_run(None).await?;
    print_dry_run(&summary)?;
    Ok(())
}

fn print_dry_run(summary: &DryRunSummary) -> Result<()> {
    println!("\nDry Run Results:");
    println!("Total URLs: {}", summary.total_urls);
    println!("Final page URLs: {}", summary.final_page_urls);
    println!("Sample scraped: {}", summary.sample_scraped);
    println!("Successful samples: {}", summary.successful_samples);

    if !summary.sample_data.is_empty() {
        println!("\nSample extracted data:");
        for (i, record) in summary.sample_data.iter().take(2).enumerate() {
            println!(
                "  {}. {} ({})",
                i + 1,
                record.title.as_deref().unwrap_or("No title"),
                record.url
            );
            if let Some(error) = &record.error {
                println!("     Error: {error}");
            }
        }
    }

    println!("\nJSON Output:");
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

async fn cmd_run(config: ScraperConfig) -> Result<()> {
    let fetcher = ReqwestFetcher::from_config(&config).context("Failed to create HTTP client")?;
    let extractor = HtmlExtractor::new()?;
    let sink = FileSink::from_config(&config);
    let orchestrator = ScrapeOrchestrator::new(config, fetcher, extractor, sink)?
        .with_cancellation(cancel_on_ctrl_c());

    println!("Running full scrape...");
    let summary = orchestrator.run_full_scrape(None).await?;
    print_full_run(&summary);
    Ok(())
}

fn print_full_run(summary: &FullRunSummary) {
    println!("\nFull Scrape Results:");
    println!("Run ID: {}", summary.run_id);
    println!("Total URLs: {}", summary.total_urls);
    println!("Final page URLs: {}", summary.final_page_urls);
    println!("Scraped records: {}", summary.scraped_records);
    println!("Successful scrapes: {}", summary.successful_scrapes);

    for error in &summary.errors {
        println!("Note: {error}");
    }

    if !summary.saved_files.is_empty() {
        println!("\nSaved files:");
        for (file_type, path) in &summary.saved_files {
            println!("  {file_type}: {}", path.display());
        }
    }

    println!("\nSuccess rate: {:.1}%", summary.success_rate());
}

fn cmd_classify(config: &ScraperConfig) -> Result<()> {
    let classifier = UrlClassifier::new(&config.final_page_patterns)?;

    let mut final_pages = 0;
    for url in &config.start_urls {
        let verdict = if !UrlClassifier::validate_url(url) {
            "invalid"
        } else if classifier.is_final_page(url) {
            final_pages += 1;
            "final"
        } else {
            "skip"
        };
        println!("{verdict:<8} {url}");
    }

    println!(
        "\n{final_pages} of {} URLs are final pages",
        config.start_urls.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::DryRun(args) | Commands::Run(args) | Commands::Classify(args) => args,
        }
    }

    #[test]
    fn test_parse_urls_and_flags() {
        let args = run_args(&[
            "harvest",
            "run",
            "-u",
            "https://x/rule/1",
            "https://x/rule/2",
            "-o",
            "out",
            "--concurrency",
            "8",
            "-v",
        ]);
        assert_eq!(args.urls.len(), 2);
        assert_eq!(args.output, Some(PathBuf::from("out")));
        assert_eq!(args.concurrency, Some(8));
        assert!(args.verbose);
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let args = run_args(&[
            "harvest",
            "dry-run",
            "--urls",
            "https://x/rule/9",
            "--output",
            "elsewhere",
            "--verbose",
        ]);
        let mut config = ScraperConfig {
            start_urls: vec!["https://x/rule/1".into()],
            ..Default::default()
        };

        apply_overrides(&mut config, &args);
        assert_eq!(config.start_urls, vec!["https://x/rule/9".to_string()]);
        assert_eq!(config.output.folder, PathBuf::from("elsewhere"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.concurrency_level, 3);
    }

    #[test]
    fn test_no_overrides_keeps_file_values() {
        let args = run_args(&["harvest", "classify"]);
        let mut config = ScraperConfig {
            start_urls: vec!["https://x/rule/1".into()],
            ..Default::default()
        };

        apply_overrides(&mut config, &args);
        assert_eq!(config.start_urls.len(), 1);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_config_file_is_none() {
        let config = read_config(Path::new("definitely_missing_harvest.toml")).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_existing_config_file_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, "concurrency_level = 7\n").unwrap();

        let config = read_config(&path).unwrap().unwrap();
        assert_eq!(config.concurrency_level, 7);
    }
}
