use std::fs;

use harvest_core::config::OutputFormat;
use harvest_core::error::AppError;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::integration::common::{mount_pages, pipeline, test_config};

#[tokio::test]
async fn full_run_writes_batch_and_report() {
    let server = MockServer::start().await;
    mount_pages(
        &server,
        &[("/rule/1", "First"), ("/regulation/2", "Second"), ("/document/3", "Third")],
    )
    .await;

    let out = TempDir::new().unwrap();
    let orch = pipeline(test_config(&out, OutputFormat::Both));
    let base = server.uri();
    let urls = vec![
        format!("{base}/rule/1"),
        format!("{base}/regulation/2"),
        format!("{base}/document/3"),
        format!("{base}/about"),
    ];

    let summary = orch.run_full_scrape(Some(urls)).await.unwrap();

    assert_eq!(summary.total_urls, 4);
    assert_eq!(summary.final_page_urls, 3);
    assert_eq!(summary.scraped_records, 3);
    assert_eq!(summary.successful_scrapes, 3);
    for key in ["json", "csv", "report"] {
        assert!(summary.saved_files[key].exists(), "{key} missing");
    }

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary.saved_files["json"]).unwrap()).unwrap();
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    let mut titles: Vec<&str> = data.iter().map(|r| r["title"].as_str().unwrap()).collect();
    titles.sort();
    assert_eq!(titles, vec!["First", "Second", "Third"]);

    let first = data
        .iter()
        .find(|r| r["url"] == format!("{base}/rule/1"))
        .unwrap();
    assert_eq!(first["id"], "1");
    assert_eq!(first["sections"][0]["title"], "Purpose");
    assert_eq!(first["metadata"]["description"], "Rule First");
    assert!(!first["text"].as_str().unwrap().contains("Home Rules Search"));

    // HTML archive is on by default.
    let archived = out.path().join("data").join("html").join("1.html");
    assert!(archived.exists());
}

#[tokio::test]
async fn failing_url_is_recorded_after_retries() {
    let server = MockServer::start().await;
    mount_pages(&server, &[("/rule/1", "Fine"), ("/rule/3", "Also fine")]).await;
    Mock::given(method("GET"))
        .and(path("/rule/2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let out = TempDir::new().unwrap();
    let orch = pipeline(test_config(&out, OutputFormat::Json));
    let base = server.uri();

    let summary = orch
        .run_full_scrape(Some(vec![
            format!("{base}/rule/1"),
            format!("{base}/rule/2"),
            format!("{base}/rule/3"),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.scraped_records, 3);
    assert_eq!(summary.successful_scrapes, 2);

    let report = fs::read_to_string(&summary.saved_files["report"]).unwrap();
    assert!(report.contains("Failed scrapes: 1"));
    assert!(report.contains(&format!("- {base}/rule/2: HTTP error: HTTP 500")));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary.saved_files["json"]).unwrap()).unwrap();
    let failed = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["url"] == format!("{base}/rule/2"))
        .unwrap();
    assert!(failed["title"].is_null());
    assert!(failed["error"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn dry_run_samples_without_writing() {
    let server = MockServer::start().await;
    mount_pages(
        &server,
        &[
            ("/rule/1", "A"),
            ("/rule/2", "B"),
            ("/rule/3", "C"),
            ("/rule/4", "D"),
        ],
    )
    .await;

    let out = TempDir::new().unwrap();
    let orch = pipeline(test_config(&out, OutputFormat::Both));
    let base = server.uri();
    let urls = (1..=4).map(|i| format!("{base}/rule/{i}")).collect();

    let summary = orch.run_dry_run(Some(urls)).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.final_page_urls, 4);
    assert_eq!(summary.sample_scraped, 3);
    assert_eq!(summary.successful_samples, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert!(!out.path().join("data").exists());
}

#[tokio::test]
async fn no_final_pages_makes_no_requests() {
    let server = MockServer::start().await;
    let out = TempDir::new().unwrap();
    let orch = pipeline(test_config(&out, OutputFormat::Json));
    let base = server.uri();

    let summary = orch
        .run_full_scrape(Some(vec![format!("{base}/"), format!("{base}/rules")]))
        .await
        .unwrap();

    assert_eq!(summary.final_page_urls, 0);
    assert_eq!(summary.scraped_records, 0);
    assert!(summary.saved_files.is_empty());
    assert_eq!(summary.errors, vec!["No final page URLs found".to_string()]);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn sink_failure_is_fatal() {
    let server = MockServer::start().await;
    mount_pages(&server, &[("/rule/1", "Only")]).await;

    let out = TempDir::new().unwrap();
    let blocker = out.path().join("blocker");
    fs::write(&blocker, "file where a folder should be").unwrap();
    let mut config = test_config(&out, OutputFormat::Json);
    config.output.folder = blocker.join("data");

    let err = pipeline(config)
        .run_full_scrape(Some(vec![format!("{}/rule/1", server.uri())]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SinkError(_)));
}
