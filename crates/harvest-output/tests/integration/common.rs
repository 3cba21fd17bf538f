use harvest_client::{HtmlExtractor, ReqwestFetcher};
use harvest_core::config::{OutputFormat, ScraperConfig};
use harvest_core::orchestrator::ScrapeOrchestrator;
use harvest_output::FileSink;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub type Pipeline = ScrapeOrchestrator<ReqwestFetcher, HtmlExtractor, FileSink>;

/// A final page with a title, a substantial body and one section.
pub fn rule_page(title: &str) -> String {
    format!(
        r#"<html><head><title>{title} | Registry</title>
        <meta name="description" content="Rule {title}"></head>
        <body>
          <nav>Home Rules Search</nav>
          <h1 class="rule-title">{title}</h1>
          <div class="rule-content">
            <h2 class="section-heading">Purpose</h2>
            <p>This rule sets out the obligations that apply to registered operators,
            including reporting duties, record retention periods and inspection rights.</p>
          </div>
          <footer>Contact</footer>
        </body></html>"#
    )
}

/// Serve `rule_page` for each path.
pub async fn mount_pages(server: &MockServer, pages: &[(&str, &str)]) {
    for (page_path, title) in pages {
        Mock::given(method("GET"))
            .and(path(*page_path))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(rule_page(title)),
            )
            .mount(server)
            .await;
    }
}

pub fn test_config(out: &TempDir, format: OutputFormat) -> ScraperConfig {
    let mut config = ScraperConfig {
        concurrency_level: 4,
        max_retries: 1,
        retry_delay: 0.0,
        request_timeout: 5,
        ..Default::default()
    };
    config.output.folder = out.path().join("data");
    config.output.format = format;
    config
}

pub fn pipeline(config: ScraperConfig) -> Pipeline {
    let fetcher = ReqwestFetcher::from_config(&config).unwrap();
    let extractor = HtmlExtractor::new().unwrap();
    let sink = FileSink::from_config(&config);
    ScrapeOrchestrator::new(config, fetcher, extractor, sink).unwrap()
}
