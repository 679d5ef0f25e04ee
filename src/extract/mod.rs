//! Listing extraction
//!
//! Turns a results page into listing candidates and finds the link to the next
//! results page. The crawl only depends on the [`Extractor`] trait; the
//! CSS-selector implementation is the default.

mod price;
mod selectors;

pub use price::parse_price;
pub use selectors::SelectorExtractor;

use url::Url;

/// A listing as found on a results page, before persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCandidate {
    /// Identifier assigned by the source site
    pub external_id: String,
    pub title: String,
    pub url: Option<Url>,
    /// Price in minor units (cents)
    pub price_cents: Option<i64>,
    /// ISO 4217 code when it could be determined
    pub currency: Option<String>,
    pub location_label: Option<String>,
    pub country: Option<String>,
    pub seller_external_id: Option<String>,
    pub seller_name: Option<String>,
    pub image_urls: Vec<String>,
}

/// Extraction collaborator used by crawl sessions
pub trait Extractor: Send + Sync {
    /// Returns the listings on a page, in page order
    fn extract(&self, html: &str, base_url: &Url) -> Vec<ListingCandidate>;

    /// Returns the next results page, or None on the last page
    fn find_next_page(&self, html: &str, base_url: &Url) -> Option<Url>;
}
