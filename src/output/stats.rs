//! Statistics over stored listings
//!
//! This module loads per-source counts from the listing store and prints them.

use crate::storage::{ListingStore, SourceCount};
use crate::GleanerError;

/// Stored listing statistics
#[derive(Debug, Clone)]
pub struct ListingStatistics {
    /// Counts per source, ordered by source id
    pub sources: Vec<SourceCount>,

    pub total_listings: u64,

    pub total_sellers: u64,

    /// Listings with at least one image
    pub total_with_images: u64,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The listing store to query
///
/// # Returns
///
/// * `Ok(ListingStatistics)` - Successfully loaded statistics
/// * `Err(GleanerError)` - Failed to query statistics
pub fn load_statistics(store: &dyn ListingStore) -> Result<ListingStatistics, GleanerError> {
    let sources = store.count_by_source()?;

    Ok(ListingStatistics {
        total_listings: sources.iter().map(|s| s.listings).sum(),
        total_sellers: sources.iter().map(|s| s.sellers).sum(),
        total_with_images: sources.iter().map(|s| s.with_images).sum(),
        sources,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &ListingStatistics) {
    println!("=== Listing Statistics ===\n");

    println!("Overview:");
    println!("  Total listings: {}", stats.total_listings);
    println!("  Total sellers: {}", stats.total_sellers);
    println!(
        "  Listings with images: {} ({:.1}%)",
        stats.total_with_images,
        percentage(stats.total_with_images, stats.total_listings)
    );
    println!();

    if stats.sources.is_empty() {
        println!("No listings stored yet.");
        return;
    }

    println!("By Source:");
    for source in &stats.sources {
        println!(
            "  {}: {} listings, {} sellers, {} with images",
            source.source_id, source.listings, source.sellers, source.with_images
        );
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
