//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! fetch, extract and ingest cycle against a SQLite file.

use dealsweep::config::{
    Config, CrawlerConfig, IdentityConfig, PaginationConfig, ProxyConfig, RetryConfig,
    StorageConfig, ThrottleConfig,
};
use dealsweep::crawler::Coordinator;
use dealsweep::storage::{open_storage, RunStatus, Storage};
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration crawling `seeds` into the database at `db_path`
fn create_test_config(seeds: Vec<String>, db_path: &Path) -> Config {
    Config {
        crawler: CrawlerConfig {
            seeds,
            allowed_domains: vec!["127.0.0.1".to_string()],
            max_concurrent_requests: 4,
            max_requests_per_origin: 2,
            max_records: 1_000,
            max_detail_visits: 10,
            max_categories: 10,
            max_stores: 10,
            max_related_depth: 1,
            max_related_fanout: 5,
            request_timeout_secs: 5,
            max_run_secs: Some(30),
            progress_interval: 100,
        },
        pagination: PaginationConfig::default(),
        retry: RetryConfig {
            retry_limit: 3,
            forbidden_base_delay_ms: 5,
            forbidden_max_retries: 3,
            transport_delay_ms: 5,
            rate_limit_delay_ms: 5,
            server_error_delay_ms: 5,
        },
        throttle: ThrottleConfig {
            start_delay_ms: 0,
            min_delay_ms: 0,
            max_delay_ms: 10,
            target_concurrency: 1.0,
            clean_streak: 2,
        },
        identity: IdentityConfig::default(),
        proxy: ProxyConfig {
            enabled: false,
            ..Default::default()
        },
        storage: StorageConfig {
            database_path: db_path.to_string_lossy().into_owned(),
            upsert_attempts: 2,
            upsert_retry_delay_ms: 5,
        },
    }
}

/// A listing page with `count` JSON-LD offers and an optional link to the next page
fn listing_page(base_url: &str, count: usize, next: Option<&str>) -> String {
    let offers: Vec<String> = (0..count)
        .map(|i| {
            format!(
                r#"{{"@type": "Offer", "url": "{}/deal/{}", "name": "Deal {}", "price": "{}.99", "seller": {{"name": "Store {}"}}}}"#,
                base_url, i, i, i + 10, i
            )
        })
        .collect();
    let link = next
        .map(|href| format!(r#"<a href="{}">Next</a>"#, href))
        .unwrap_or_default();
    format!(
        r#"<html><head><title>Deals</title>
        <script type="application/ld+json">[{}]</script></head>
        <body>{}</body></html>"#,
        offers.join(","),
        link
    )
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

/// Mounts an empty second page so the listing at `listing_path` stops paginating
async fn mount_last_page(server: &MockServer, listing_path: &str) {
    Mock::given(method("GET"))
        .and(path(listing_path))
        .and(query_param("start", "20"))
        .respond_with(html("<html><body>No more deals</body></html>".to_string()))
        .mount(server)
        .await;
}

async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_pagination_stops_at_empty_page() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("deals.db");

    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("start", "40"))
        .respond_with(html(listing_page(&base_url, 3, None)))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("start", "20"))
        .respond_with(html("<html><body>No more deals</body></html>".to_string()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(listing_page(&base_url, 5, Some("/?start=20"))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(vec![format!("{}/", base_url)], &db_path);
    let mut coordinator = Coordinator::new(config, "integration").unwrap();
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.ingested, 5);
    assert_eq!(summary.storage_drops, 0);
    assert_eq!(request_count(&mock_server).await, 2);
    drop(coordinator);

    let storage = open_storage(&db_path).unwrap();
    let stats = storage.statistics().unwrap();
    assert_eq!(stats.deals, 5);
    assert_eq!(stats.distinct_stores, 5);

    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.ingested, 5);
}

#[tokio::test]
async fn test_not_found_is_skipped_without_retry() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("deals.db");

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(vec![format!("{}/gone", base_url)], &db_path);
    let mut coordinator = Coordinator::new(config, "integration").unwrap();
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.fetched, 0);
    assert_eq!(summary.retries, 0);
    assert_eq!(summary.skipped_terminal, 1);
    assert_eq!(summary.ingested, 0);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("deals.db");

    mount_last_page(&mock_server, "/flaky").await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(html(listing_page(&base_url, 2, None)))
        .mount(&mock_server)
        .await;

    let config = create_test_config(vec![format!("{}/flaky", base_url)], &db_path);
    let mut coordinator = Coordinator::new(config, "integration").unwrap();
    let summary = coordinator.run().await.unwrap();

    // 503, 200, then the empty second page
    assert_eq!(request_count(&mock_server).await, 3);
    assert_eq!(summary.retries, 1);
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.retries_exhausted, 0);
}

#[tokio::test]
async fn test_repeated_seeds_and_runs_ingest_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("deals.db");

    mount_last_page(&mock_server, "/deals").await;

    Mock::given(method("GET"))
        .and(path("/deals"))
        .respond_with(html(listing_page(&base_url, 3, None)))
        .mount(&mock_server)
        .await;

    let seed = format!("{}/deals", base_url);
    let seeds = vec![seed.clone(), seed.clone(), format!("{}/deals#top", base_url)];

    let config = create_test_config(seeds, &db_path);
    let mut first = Coordinator::new(config.clone(), "integration").unwrap();
    let summary = first.run().await.unwrap();

    // One fetch of the listing despite three spellings of the seed, plus its empty second page
    assert_eq!(request_count(&mock_server).await, 2);
    assert_eq!(summary.ingested, 3);
    drop(first);

    // A second run over the same database only sees deals it already has
    let mut second = Coordinator::new(config, "integration").unwrap();
    let summary = second.run().await.unwrap();
    drop(second);

    assert_eq!(summary.ingested, 0);
    assert_eq!(summary.duplicates, 3);

    let storage = open_storage(&db_path).unwrap();
    assert_eq!(storage.statistics().unwrap().deals, 3);
    assert_eq!(storage.statistics().unwrap().runs, 2);
}
