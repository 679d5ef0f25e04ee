//! Storage module for persisting listings
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Listing persistence with identity-based deduplication
//! - Seller and location get-or-create by natural key
//! - Run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteListingStore;
pub use traits::{ListingStore, SaveOutcome, StorageError, StorageResult};

use crate::extract::ListingCandidate;
use crate::GleanerError;

use std::path::Path;

/// Opens or creates a listings database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteListingStore)` - Successfully initialized storage
/// * `Err(GleanerError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteListingStore, GleanerError> {
    SqliteListingStore::new(path)
}

/// Natural key of a seller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerKey {
    pub source_id: String,
    pub external_id: String,
    pub name: Option<String>,
}

/// Natural key of a location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationKey {
    pub label: String,
    pub country: Option<String>,
}

/// A listing ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub url: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub seller: Option<SellerKey>,
    pub location: Option<LocationKey>,
    pub image_urls: Vec<String>,
}

impl ListingRecord {
    pub fn from_candidate(source_id: &str, candidate: &ListingCandidate) -> Self {
        let seller = candidate
            .seller_external_id
            .as_ref()
            .map(|external_id| SellerKey {
                source_id: source_id.to_string(),
                external_id: external_id.clone(),
                name: candidate.seller_name.clone(),
            });

        let location = candidate
            .location_label
            .as_ref()
            .map(|label| LocationKey {
                label: label.clone(),
                country: candidate.country.clone(),
            });

        Self {
            source_id: source_id.to_string(),
            external_id: candidate.external_id.clone(),
            title: candidate.title.clone(),
            url: candidate.url.as_ref().map(|u| u.to_string()),
            price_cents: candidate.price_cents,
            currency: candidate.currency.clone(),
            seller,
            location,
            image_urls: candidate.image_urls.clone(),
        }
    }
}

/// Stored counts for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCount {
    pub source_id: String,
    pub listings: u64,
    pub sellers: u64,
    pub with_images: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            let parsed = RunStatus::from_db_string(status.to_db_string());
            assert_eq!(Some(*status), parsed);
        }
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_record_from_candidate() {
        let candidate = ListingCandidate {
            external_id: "a1".to_string(),
            title: "Road bike".to_string(),
            url: Some(Url::parse("https://market.example/item/a1").unwrap()),
            price_cents: Some(12500),
            currency: Some("EUR".to_string()),
            location_label: Some("Berlin".to_string()),
            country: Some("DE".to_string()),
            seller_external_id: Some("s9".to_string()),
            seller_name: Some("Anna".to_string()),
            image_urls: vec![],
        };

        let record = ListingRecord::from_candidate("market", &candidate);
        assert_eq!(record.source_id, "market");
        assert_eq!(
            record.seller,
            Some(SellerKey {
                source_id: "market".to_string(),
                external_id: "s9".to_string(),
                name: Some("Anna".to_string()),
            })
        );
        assert_eq!(record.location.unwrap().country.as_deref(), Some("DE"));
        assert_eq!(record.url.as_deref(), Some("https://market.example/item/a1"));
    }

    #[test]
    fn test_record_without_seller() {
        let candidate = ListingCandidate {
            external_id: "a2".to_string(),
            title: "Gravel bike".to_string(),
            url: None,
            price_cents: None,
            currency: None,
            location_label: None,
            country: None,
            seller_external_id: None,
            seller_name: Some("Orphan name".to_string()),
            image_urls: vec![],
        };

        let record = ListingRecord::from_candidate("market", &candidate);
        assert!(record.seller.is_none());
        assert!(record.location.is_none());
    }
}
