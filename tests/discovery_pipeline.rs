//! Discovery crawler against real HTTP pages served by wiremock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedhound::discovery::{
    DiscoverySettings, DiscoverySink, FeedDiscovery, NoSearch, OutputFormat, SearchError,
    SearchProvider,
};
use feedhound::feed::{HttpTransport, TransportSettings};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> DiscoverySettings {
    DiscoverySettings {
        threads: 2,
        empty_queue_backoff: Duration::from_millis(5),
        ..DiscoverySettings::default()
    }
}

async fn discovery(
    search: Arc<dyn SearchProvider>,
    output: &std::path::Path,
    format: OutputFormat,
) -> Arc<FeedDiscovery> {
    let transport = HttpTransport::new(TransportSettings::default()).unwrap();
    let sink = DiscoverySink::open(output, format).await.unwrap();
    Arc::new(FeedDiscovery::new(
        search,
        Arc::new(transport),
        Arc::new(sink),
        settings(),
    ))
}

#[tokio::test]
async fn test_seed_pages_written_as_json_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head>
                <title>Blog</title>
                <link rel="alternate" type="application/atom+xml" title="Atom" href="atom.xml">
                <link rel="alternate" type="application/rss+xml" href="feed://feeds.example.com/rss">
            </head></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>no feeds</body></html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("feeds.jsonl");
    let crawler = discovery(Arc::new(NoSearch), &output, OutputFormat::Extended).await;
    crawler.add_urls([
        format!("{}/blog/", server.uri()),
        format!("{}/plain", server.uri()),
        format!("{}/missing", server.uri()),
    ]);

    let stats = crawler.run().await;
    assert_eq!(stats.pages_checked, 3);
    assert_eq!(stats.feeds_found, 2);
    assert_eq!(stats.errors, 1);

    let mut records: Vec<serde_json::Value> = std::fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    records.sort_by_key(|r| r["url"].as_str().unwrap_or_default().to_string());

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["url"], "http://feeds.example.com/rss");
    assert_eq!(records[0]["type"], "rss");
    assert_eq!(records[1]["url"], format!("{}/blog/atom.xml", server.uri()));
    assert_eq!(records[1]["type"], "atom");
    assert_eq!(records[1]["title"], "Atom");
    assert_eq!(records[1]["page"], format!("{}/blog/", server.uri()));
}

/// Returns the same URLs for every query.
struct FixedSearch(Vec<String>);

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, _: &str, _: usize, _: &str) -> Result<Vec<String>, SearchError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_private_search_results_are_not_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("feeds.txt");
    let search = FixedSearch(vec![
        format!("{}/", server.uri()),
        "http://192.168.0.10/".to_string(),
        "ftp://example.com/".to_string(),
    ]);
    let crawler = discovery(Arc::new(search), &output, OutputFormat::Plain).await;
    crawler.add_queries(["rust", "feeds"]);
    crawler.combine_queries(3);

    let stats = tokio::time::timeout(Duration::from_secs(10), crawler.run())
        .await
        .expect("crawler must finish");
    assert_eq!(stats.queries_searched, 3);
    assert_eq!(stats.pages_queued, 0);
    assert_eq!(stats.pages_checked, 0);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
    server.verify().await;
}
