//! Shared fixtures for the integration tests

#![allow(dead_code)]

use gleaner::config::{
    BackoffConfig, ChallengeConfig, Config, EgressConfig, ExtractConfig, OutputConfig,
    QueryEntry, SessionConfig, SourceConfig,
};
use gleaner::storage::{ListingRecord, SellerKey};
use std::path::Path;

pub const SOURCE_ID: &str = "market";

/// Creates a test configuration: direct egress only, no pacing, millisecond backoff
pub fn create_test_config(dir: &Path, queries: Vec<QueryEntry>) -> Config {
    Config {
        source: SourceConfig {
            id: SOURCE_ID.to_string(),
        },
        queries,
        egress: EgressConfig {
            include_direct: true,
            points: vec![],
            file: None,
            failure_threshold: 3,
            cooldown_secs: 600,
        },
        backoff: BackoffConfig {
            base_ms: 1,
            cap_ms: 5,
            multiplier: 2.0,
            max_transient_attempts: 3,
            max_blocked_attempts: 6,
        },
        challenge: ChallengeConfig {
            cooldown_secs: 0,
            manual_dir: dir.join("challenges").to_string_lossy().to_string(),
            operator_wait: false,
            operator_poll_ms: 100,
            signatures: vec![],
        },
        session: SessionConfig {
            sample_size: 10,
            min_sample_size: 10,
            pacing_min_ms: 0,
            pacing_max_ms: 0,
            fetch_timeout_secs: 5,
            ..SessionConfig::default()
        },
        extract: ExtractConfig::default(),
        output: OutputConfig {
            database_path: dir.join("listings.db").to_string_lossy().to_string(),
            report_path: None,
        },
    }
}

pub fn query(name: &str, url: String) -> QueryEntry {
    QueryEntry {
        name: name.to_string(),
        url,
    }
}

pub fn listing_id(prefix: &str, n: usize) -> String {
    format!("{}-{}", prefix, n)
}

/// Renders a results page with listings `prefix-start` .. `prefix-(start+count-1)`
pub fn listing_page(prefix: &str, start: usize, count: usize, next: Option<&str>) -> String {
    let mut html = String::from("<html><head><title>Results</title></head><body><main>");

    for n in start..start + count {
        let id = listing_id(prefix, n);
        html.push_str(&format!(
            r#"<article data-listing-id="{id}">
                <a href="/item/{id}"><h2 class="listing-title">Listing {n}</h2></a>
                <span class="listing-price">€{n},50</span>
                <span class="listing-location">Berlin</span>
                <span data-seller-id="seller-{seller}">Seller {seller}</span>
                <img src="/img/{id}.jpg">
            </article>"#,
            id = id,
            n = n,
            seller = n % 3
        ));
    }

    if let Some(next) = next {
        html.push_str(&format!(r#"<nav><a rel="next" href="{}">Next</a></nav>"#, next));
    }

    html.push_str("</main></body></html>");
    html
}

/// A managed challenge interstitial
pub fn challenge_page() -> String {
    "<html><head><title>Just a moment...</title></head>\
     <body><div id=\"challenge-platform\">Checking your browser</div></body></html>"
        .to_string()
}

pub fn seed_record(external_id: &str) -> ListingRecord {
    ListingRecord {
        source_id: SOURCE_ID.to_string(),
        external_id: external_id.to_string(),
        title: format!("Seeded {}", external_id),
        url: None,
        price_cents: Some(1000),
        currency: Some("EUR".to_string()),
        seller: Some(SellerKey {
            source_id: SOURCE_ID.to_string(),
            external_id: "seller-0".to_string(),
            name: None,
        }),
        location: None,
        image_urls: vec![],
    }
}
