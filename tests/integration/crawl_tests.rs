//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small site and run full create and
//! restore cycles through the coordinator.

use onion_crawler::config::Config;
use onion_crawler::crawler::{Coordinator, CrawlMode, CrawlOptions};
use onion_crawler::output::load_recovery;
use onion_crawler::storage::{RunMode, RunStatus, SqliteStorage, Storage};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// The mock server lives on loopback, which the onion filter rejects
fn accept_http(url: &str) -> bool {
    url.starts_with("http://")
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/html; charset=utf-8")
}

fn create_test_config(root: &Path, seeds: &[String]) -> Config {
    let seeds_file = root.join("seeds.txt");
    fs::write(&seeds_file, seeds.join("\n")).unwrap();

    let mut config = Config::default();
    config.crawler.proxy_url = "none".to_string();
    config.crawler.request_timeout_secs = 5;
    config.paths.data_dir = root.join("data");
    config.paths.queue_dir = root.join("data/queue");
    config.paths.seeds_file = seeds_file;
    config.persistence.snapshot_interval_secs = 1;
    config
}

async fn mount_site(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{0}/page1">Page 1</a>
            <a href="/page2">Page 2</a>
            <a href="/image.png">Image</a>
            </body></html>"#,
            base
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html(
            r#"<html><body><a href="/">Home</a><a href="/page2">Page 2</a></body></html>"#
                .to_string(),
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/image.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 4], "image/png"))
        .mount(server)
        .await;
}

/// Runs the coordinator until `expected` fetches have completed
async fn crawl_until(coordinator: Coordinator, expected: u64) -> RunStatus {
    let stats = coordinator.statistics().clone();
    let done = async move {
        while stats.pages_fetched() + stats.fetch_errors() < expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    tokio::time::timeout(Duration::from_secs(30), coordinator.run(done))
        .await
        .expect("crawl did not finish in time")
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_then_restore() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = tempdir().unwrap();
    let config = create_test_config(dir.path(), &[format!("{}/", server.uri())]);

    // Create: /, /page1 and /image.png succeed or fail, /page2 fails
    let coordinator = Coordinator::new(
        config.clone(),
        CrawlOptions {
            mode: CrawlMode::Create { thread_count: 2 },
            use_cookies: false,
            config_hash: Some("test".to_string()),
        },
    )
    .unwrap()
    .with_filter(accept_http);
    let first_run = coordinator.run_id();

    let status = crawl_until(coordinator, 4).await;
    assert_eq!(status, RunStatus::Interrupted);

    let record = load_recovery(&config.paths.recovery_path()).unwrap();
    assert_eq!(record.thread_count, 2);
    assert_eq!(record.pages_fetched, 2);
    assert_eq!(record.fetch_errors, 2);
    assert_eq!(record.urls_discovered, 4);
    assert_eq!(record.fetched_per_thread.iter().sum::<u64>(), 2);

    let status_text = fs::read_to_string(config.paths.status_path()).unwrap();
    assert!(status_text.contains("Pages correctly fetched: 2"));
    assert!(status_text.contains("Queue size: 0"));

    {
        let storage = SqliteStorage::new(&config.paths.database_path()).unwrap();
        assert_eq!(storage.count_pages().unwrap(), 2);
        assert_eq!(storage.count_fetch_errors().unwrap(), 2);
        assert_eq!(storage.count_discovered().unwrap(), 4);
        // Home links to three pages, page1 links back home and to page2
        assert_eq!(storage.count_page_links().unwrap(), 5);

        let run = storage.get_run(first_run).unwrap();
        assert_eq!(run.mode, RunMode::Create);
        assert_eq!(run.status, RunStatus::Interrupted);
        assert_eq!(run.config_hash, "test");
    }

    // Restore: counters and the discovered set come back, seeds are not re-queued
    let coordinator = Coordinator::new(
        config.clone(),
        CrawlOptions {
            mode: CrawlMode::Restore,
            use_cookies: false,
            config_hash: None,
        },
    )
    .unwrap()
    .with_filter(accept_http);

    assert_eq!(coordinator.statistics().thread_count(), 2);
    assert_eq!(coordinator.statistics().pages_fetched(), 2);
    assert!(coordinator.queue().is_empty());
    assert_eq!(coordinator.seed().unwrap(), 0);

    let status = crawl_until(coordinator, 4).await;
    assert_eq!(status, RunStatus::Interrupted);

    let storage = SqliteStorage::new(&config.paths.database_path()).unwrap();
    let latest = storage.latest_run().unwrap().unwrap();
    assert_eq!(latest.mode, RunMode::Restore);
    assert_eq!(storage.count_pages().unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restore_continues_pending_queue() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = tempdir().unwrap();
    let config = create_test_config(dir.path(), &[format!("{}/", server.uri())]);

    // Stop right after the seed is fetched; its links stay queued
    let coordinator = Coordinator::new(
        config.clone(),
        CrawlOptions {
            mode: CrawlMode::Create { thread_count: 1 },
            use_cookies: false,
            config_hash: None,
        },
    )
    .unwrap()
    .with_filter(accept_http);
    crawl_until(coordinator, 1).await;

    let record = load_recovery(&config.paths.recovery_path()).unwrap();
    let processed = record.pages_fetched + record.fetch_errors;

    let coordinator = Coordinator::new(
        config.clone(),
        CrawlOptions {
            mode: CrawlMode::Restore,
            use_cookies: false,
            config_hash: None,
        },
    )
    .unwrap()
    .with_filter(accept_http);
    assert_eq!(coordinator.queue().len() as u64, 4 - processed);

    crawl_until(coordinator, 4).await;

    let record = load_recovery(&config.paths.recovery_path()).unwrap();
    assert_eq!(record.pages_fetched, 2);
    assert_eq!(record.fetch_errors, 2);
    assert_eq!(record.urls_discovered, 4);
}
