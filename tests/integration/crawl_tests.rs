//! Integration tests for crawl sessions
//!
//! These tests use wiremock to serve a paginated marketplace and run full
//! sessions end-to-end against a real SQLite store.

mod common;

use common::{create_test_config, listing_id, listing_page, query, seed_record, SOURCE_ID};
use gleaner::config::{Config, QueryEntry};
use gleaner::output::{format_markdown_report, RunReport};
use gleaner::session::StopReason;
use gleaner::storage::{ListingStore, RunStatus, SqliteListingStore};
use gleaner::{Orchestrator, SessionOutcome};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn open_store(config: &Config) -> Arc<SqliteListingStore> {
    Arc::new(SqliteListingStore::new(Path::new(&config.output.database_path)).unwrap())
}

fn orchestrator(config: Config, store: Arc<SqliteListingStore>) -> Orchestrator {
    Orchestrator::from_config(config, store, CancellationToken::new()).unwrap()
}

async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn single_query(server: &MockServer, route: &str) -> Vec<QueryEntry> {
    vec![query("bikes", format!("{}{}", server.uri(), route))]
}

#[tokio::test]
async fn test_session_follows_pagination_to_the_end() {
    let server = MockServer::start().await;
    mount_page(&server, "/bikes/1", listing_page("b", 1, 20, Some("/bikes/2"))).await;
    mount_page(&server, "/bikes/2", listing_page("b", 21, 20, Some("/bikes/3"))).await;
    mount_page(&server, "/bikes/3", listing_page("b", 41, 0, None)).await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    let orchestrator = orchestrator(config, store.clone());

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.reason, StopReason::NoNextPage);
    assert_eq!(summary.pages_fetched, 3);
    assert_eq!(summary.requests_made, 3);
    assert_eq!(summary.saved, 40);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.dropped, 0);
    assert!(summary.last_url.unwrap().ends_with("/bikes/3"));

    assert!(store.exists(SOURCE_ID, "b-40").unwrap());
    assert!(!store.exists(SOURCE_ID, "b-41").unwrap());
    let counts = store.count_by_source().unwrap();
    assert_eq!(counts[0].listings, 40);
    assert_eq!(counts[0].sellers, 3);

    let images = store.image_urls(SOURCE_ID, "b-7").unwrap();
    assert_eq!(images, vec![format!("{}/img/b-7.jpg", server.uri())]);
}

#[tokio::test]
async fn test_session_abandons_when_results_already_stored() {
    let server = MockServer::start().await;
    mount_page(&server, "/bikes/1", listing_page("b", 1, 20, Some("/bikes/2"))).await;
    Mock::given(method("GET"))
        .and(path("/bikes/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page("b", 21, 20, None)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    for n in 1..=9 {
        store.save(&seed_record(&listing_id("b", n))).unwrap();
    }
    let orchestrator = orchestrator(config, store.clone());

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.outcome, SessionOutcome::AbandonedDuplicates);
    assert_eq!(
        summary.reason,
        StopReason::DuplicateThreshold {
            sampled: 10,
            duplicates: 9
        }
    );
    assert_eq!(summary.pages_fetched, 1);
    assert!(summary.skipped >= 9);
    assert_eq!(summary.saved, 0);

    // Nothing from the abandoned page is written
    assert!(!store.exists(SOURCE_ID, "b-10").unwrap());
    assert!(!store.exists(SOURCE_ID, "b-15").unwrap());
}

#[tokio::test]
async fn test_session_continues_below_duplicate_threshold() {
    let server = MockServer::start().await;
    mount_page(&server, "/bikes/1", listing_page("b", 1, 20, None)).await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    for n in 1..=7 {
        store.save(&seed_record(&listing_id("b", n))).unwrap();
    }
    let orchestrator = orchestrator(config, store.clone());

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.sampled, 10);
    assert_eq!(summary.duplicates, 7);
    assert_eq!(summary.saved, 13);
    assert_eq!(summary.skipped, 7);
    assert_eq!(store.count_by_source().unwrap()[0].listings, 20);
}

#[tokio::test]
async fn test_transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_page(&server, "/bikes/1", listing_page("b", 1, 5, None)).await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    let orchestrator = orchestrator(config, store);

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.requests_made, 3);
    assert_eq!(summary.saved, 5);
    assert_eq!(summary.challenge_stats.detected, 0);
}

#[tokio::test]
async fn test_transient_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    let orchestrator = orchestrator(config, store);

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.outcome, SessionOutcome::AbandonedFatal);
    assert_eq!(summary.pages_fetched, 0);
    assert!(summary.reason.to_string().contains("retries exhausted"));
}

#[tokio::test]
async fn test_timeouts_are_transport_failures_against_the_point() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_page("b", 1, 5, None))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let mut config = create_test_config(dir.path(), queries.clone());
    config.session.fetch_timeout_secs = 1;
    let store = open_store(&config);
    let orchestrator = orchestrator(config, store);

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.outcome, SessionOutcome::AbandonedFatal);
    assert!(summary.reason.to_string().contains("retries exhausted"));
    assert_eq!(summary.pages_fetched, 0);
    assert_eq!(summary.requests_made, 3);
    assert_eq!(summary.challenge_stats.detected, 0);

    let points = orchestrator.pool().snapshot();
    assert_eq!(points[0].failure_count, 3);
    assert_eq!(points[0].success_count, 0);
}

#[tokio::test]
async fn test_not_found_is_fatal_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    let orchestrator = orchestrator(config, store);

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.outcome, SessionOutcome::AbandonedFatal);
    assert!(summary.reason.to_string().contains("HTTP 404"));
    assert_eq!(summary.requests_made, 1);
}

#[tokio::test]
async fn test_page_limit_stops_session() {
    let server = MockServer::start().await;
    mount_page(&server, "/bikes/1", listing_page("b", 1, 3, Some("/bikes/2"))).await;
    mount_page(&server, "/bikes/2", listing_page("b", 4, 3, Some("/bikes/3"))).await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let mut config = create_test_config(dir.path(), queries.clone());
    config.session.max_pages = 2;
    let store = open_store(&config);
    let orchestrator = orchestrator(config, store);

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.reason, StopReason::PageLimit);
    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(summary.saved, 6);
}

#[tokio::test]
async fn test_next_link_loop_ends_session() {
    let server = MockServer::start().await;
    mount_page(&server, "/bikes/1", listing_page("b", 1, 3, Some("/bikes/2"))).await;
    mount_page(&server, "/bikes/2", listing_page("b", 4, 3, Some("/bikes/1"))).await;

    let dir = TempDir::new().unwrap();
    let queries = single_query(&server, "/bikes/1");
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    let orchestrator = orchestrator(config, store);

    let summary = orchestrator.start_session(&queries[0]).await;

    assert_eq!(summary.reason, StopReason::NoNextPage);
    assert_eq!(summary.pages_fetched, 2);
}

#[tokio::test]
async fn test_run_queries_returns_summaries_in_order() {
    let server = MockServer::start().await;
    mount_page(&server, "/bikes/1", listing_page("b", 1, 4, None)).await;
    mount_page(&server, "/cars/1", listing_page("c", 1, 6, None)).await;
    mount_page(&server, "/boats/1", listing_page("s", 1, 2, None)).await;

    let dir = TempDir::new().unwrap();
    let queries = vec![
        query("bikes", format!("{}/bikes/1", server.uri())),
        query("cars", format!("{}/cars/1", server.uri())),
        query("boats", format!("{}/boats/1", server.uri())),
    ];
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    let run_id = store.create_run("test-hash").unwrap();
    let started_at = chrono::Utc::now();
    let orchestrator = Arc::new(orchestrator(config, store.clone()));
    let pool = orchestrator.pool().clone();

    let summaries = orchestrator.run_queries(queries).await;

    let names: Vec<&str> = summaries.iter().map(|s| s.query.as_str()).collect();
    assert_eq!(names, vec!["bikes", "cars", "boats"]);
    assert!(summaries
        .iter()
        .all(|s| s.outcome == SessionOutcome::Completed));

    let report = RunReport::new(
        Some(run_id),
        SOURCE_ID,
        "test-hash",
        started_at,
        summaries,
        pool.stats(),
    );
    assert_eq!(report.total_saved(), 12);
    assert_eq!(report.status(), RunStatus::Completed);

    store.finish_run(run_id, report.status()).unwrap();
    assert_eq!(store.run_status(run_id).unwrap(), Some(RunStatus::Completed));

    let markdown = format_markdown_report(&report);
    assert!(markdown.contains("| cars | completed | no next page | 1 | 1 | 6 | 0 | 0 |"));
}

#[tokio::test]
async fn test_cancelled_run_issues_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page("b", 1, 2, None)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let queries = vec![
        query("bikes", format!("{}/bikes/1", server.uri())),
        query("cars", format!("{}/cars/1", server.uri())),
    ];
    let config = create_test_config(dir.path(), queries.clone());
    let store = open_store(&config);
    let cancel = CancellationToken::new();
    let orchestrator =
        Arc::new(Orchestrator::from_config(config, store, cancel.clone()).unwrap());

    cancel.cancel();
    let summaries = orchestrator.run_queries(queries).await;

    assert_eq!(summaries.len(), 2);
    assert!(summaries
        .iter()
        .all(|s| s.outcome == SessionOutcome::Cancelled));
}
