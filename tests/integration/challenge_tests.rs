//! Integration tests for challenge handling
//!
//! A wiremock server plays a marketplace that answers with challenge pages; the
//! tests drive whole sessions through the resolution chain and the file-based
//! operator channel.

mod common;

use common::{challenge_page, create_test_config, listing_page, query, SOURCE_ID};
use gleaner::challenge::{challenge_key, FileOperatorChannel, OperatorDecision};
use gleaner::config::{Config, QueryEntry};
use gleaner::session::StopReason;
use gleaner::storage::SqliteListingStore;
use gleaner::{Orchestrator, SessionOutcome};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn build(config: Config, cancel: CancellationToken) -> Orchestrator {
    let store =
        Arc::new(SqliteListingStore::new(Path::new(&config.output.database_path)).unwrap());
    Orchestrator::from_config(config, store, cancel).unwrap()
}

fn operator(config: &Config) -> FileOperatorChannel {
    FileOperatorChannel::new(&config.challenge.manual_dir, Duration::from_millis(20))
}

async fn mount_challenge(server: &MockServer, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(403).set_body_string(challenge_page()));
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

async fn mount_listings(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page("b", 1, 5, None)))
        .mount(server)
        .await;
}

fn bikes(server: &MockServer) -> QueryEntry {
    query("bikes", format!("{}/bikes/1", server.uri()))
}

/// Answers the first pending challenge that shows up
fn answer_first_pending(channel: FileOperatorChannel, decision: OperatorDecision) {
    tokio::spawn(async move {
        loop {
            if let Some(pending) = channel.pending().unwrap().first() {
                channel.decide(&pending.key, decision).unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });
}

#[tokio::test]
async fn test_persistent_challenge_abandons_session() {
    let server = MockServer::start().await;
    mount_challenge(&server, None).await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&server);
    let config = create_test_config(dir.path(), vec![query.clone()]);
    let channel = operator(&config);
    let orchestrator = build(config, CancellationToken::new());

    let summary = orchestrator.start_session(&query).await;

    assert_eq!(summary.outcome, SessionOutcome::AbandonedFatal);
    assert!(summary.reason.to_string().contains("unresolved challenge"));
    assert_eq!(summary.pages_fetched, 0);

    let stats = &summary.challenge_stats;
    assert_eq!(stats.detected, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_resolved(), 0);
    for strategy in [
        "header-swap",
        "timed-backoff",
        "egress-rotation",
        "manual-intervention",
    ] {
        assert_eq!(stats.attempted.get(strategy), Some(&1), "{}", strategy);
    }

    // Initial request plus one probe each after header swap and timed backoff
    assert_eq!(summary.requests_made, 3);

    // The page stays with the operator
    let pending = channel.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, challenge_key(SOURCE_ID, &query.url));
    let body = std::fs::read_to_string(&pending[0].body_path).unwrap();
    assert!(body.contains("challenge-platform"));

    // No alternative point existed, so rotation quarantined the only one
    assert_eq!(orchestrator.pool().stats().quarantine_events, 1);
}

#[tokio::test]
async fn test_header_swap_clears_challenge() {
    let server = MockServer::start().await;
    mount_challenge(&server, Some(1)).await;
    mount_listings(&server).await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&server);
    let config = create_test_config(dir.path(), vec![query.clone()]);
    let orchestrator = build(config, CancellationToken::new());

    let summary = orchestrator.start_session(&query).await;

    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.saved, 5);
    assert_eq!(summary.requests_made, 2);
    assert_eq!(summary.challenge_stats.detected, 1);
    assert_eq!(summary.challenge_stats.resolved.get("header-swap"), Some(&1));
    assert_eq!(orchestrator.pool().stats().quarantine_events, 0);
}

#[tokio::test]
async fn test_egress_rotation_fetches_through_the_next_point() {
    let market = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(403).set_body_string(challenge_page()))
        .expect(3)
        .mount(&market)
        .await;

    // Plays an HTTP forward proxy that reaches the listings
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page("b", 1, 5, None)))
        .expect(1)
        .mount(&proxy)
        .await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&market);
    let mut config = create_test_config(dir.path(), vec![query.clone()]);
    config.egress.points = vec![proxy.uri()];
    let orchestrator = build(config, CancellationToken::new());

    let summary = orchestrator.start_session(&query).await;

    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.saved, 5);
    assert_eq!(summary.requests_made, 4);
    assert_eq!(
        summary.challenge_stats.resolved.get("egress-rotation"),
        Some(&1)
    );
    assert_eq!(summary.challenge_stats.failed, 0);

    let pool = orchestrator.pool().stats();
    assert_eq!(pool.total, 2);
    assert_eq!(pool.quarantine_events, 1);
    assert_eq!(pool.quarantined, 1);
}

#[tokio::test]
async fn test_final_status_after_challenge_is_not_a_resolution() {
    let server = MockServer::start().await;
    mount_challenge(&server, Some(1)).await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&server);
    let config = create_test_config(dir.path(), vec![query.clone()]);
    let orchestrator = build(config, CancellationToken::new());

    let summary = orchestrator.start_session(&query).await;

    assert_eq!(summary.outcome, SessionOutcome::AbandonedFatal);
    assert!(summary.reason.to_string().contains("HTTP 404"));
    assert_eq!(summary.requests_made, 2);

    let stats = &summary.challenge_stats;
    assert_eq!(stats.detected, 1);
    assert_eq!(stats.total_resolved(), 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.attempted.get("header-swap"), Some(&1));
    assert_eq!(stats.attempted.get("timed-backoff"), None);
}

#[tokio::test]
async fn test_operator_sees_latest_challenge_page() {
    let server = MockServer::start().await;
    let interstitial = |ray: &str| {
        format!(
            "<html><body><div id=\"challenge-platform\">Checking your browser</div>\
             <span class=\"ray\">{}</span></body></html>",
            ray
        )
    };
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(403).set_body_string(interstitial("ray-first")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(403).set_body_string(interstitial("ray-latest")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&server);
    let config = create_test_config(dir.path(), vec![query.clone()]);
    let channel = operator(&config);
    let orchestrator = build(config, CancellationToken::new());

    let summary = orchestrator.start_session(&query).await;
    assert_eq!(summary.outcome, SessionOutcome::AbandonedFatal);

    let pending = channel.pending().unwrap();
    assert_eq!(pending.len(), 1);
    let body = std::fs::read_to_string(&pending[0].body_path).unwrap();
    assert!(body.contains("ray-latest"));
    assert!(!body.contains("ray-first"));
}

#[tokio::test]
async fn test_rate_limit_is_resolved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bikes/1"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_listings(&server).await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&server);
    let config = create_test_config(dir.path(), vec![query.clone()]);
    let orchestrator = build(config, CancellationToken::new());

    let summary = orchestrator.start_session(&query).await;

    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.challenge_stats.detected, 1);
    assert_eq!(summary.challenge_stats.total_resolved(), 1);
}

#[tokio::test]
async fn test_operator_resolution_resumes_session() {
    let server = MockServer::start().await;
    mount_challenge(&server, Some(3)).await;
    mount_listings(&server).await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&server);
    let mut config = create_test_config(dir.path(), vec![query.clone()]);
    config.challenge.operator_wait = true;
    let channel = operator(&config);
    let orchestrator = build(config, CancellationToken::new());

    answer_first_pending(channel.clone(), OperatorDecision::Resolved);
    let summary = tokio::time::timeout(Duration::from_secs(10), orchestrator.start_session(&query))
        .await
        .unwrap();

    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.saved, 5);
    assert_eq!(summary.requests_made, 4);
    assert_eq!(
        summary.challenge_stats.resolved.get("manual-intervention"),
        Some(&1)
    );
    assert!(channel.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_operator_skip_abandons_session() {
    let server = MockServer::start().await;
    mount_challenge(&server, None).await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&server);
    let mut config = create_test_config(dir.path(), vec![query.clone()]);
    config.challenge.operator_wait = true;
    let channel = operator(&config);
    let orchestrator = build(config, CancellationToken::new());

    answer_first_pending(channel, OperatorDecision::Skip);
    let summary = tokio::time::timeout(Duration::from_secs(10), orchestrator.start_session(&query))
        .await
        .unwrap();

    assert_eq!(summary.outcome, SessionOutcome::AbandonedFatal);
    assert_eq!(summary.reason, StopReason::OperatorSkip(query.url.clone()));
    assert_eq!(summary.challenge_stats.skipped, 1);
    assert_eq!(summary.challenge_stats.failed, 0);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_operator() {
    let server = MockServer::start().await;
    mount_challenge(&server, None).await;

    let dir = TempDir::new().unwrap();
    let query = bikes(&server);
    let mut config = create_test_config(dir.path(), vec![query.clone()]);
    config.challenge.operator_wait = true;
    let channel = operator(&config);
    let cancel = CancellationToken::new();
    let orchestrator = build(config, cancel.clone());

    tokio::spawn(async move {
        while channel.pending().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(10), orchestrator.start_session(&query))
        .await
        .unwrap();

    assert_eq!(summary.outcome, SessionOutcome::Cancelled);
}
