//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Gleaner database.

/// SQL schema for the database
///
/// Natural keys carry UNIQUE constraints so get-or-create and save stay correct
/// when several connections write concurrently. `locations.country` uses `''`
/// for unknown, since NULLs never collide in a UNIQUE index.
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Sellers, scoped to their source
CREATE TABLE IF NOT EXISTS sellers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    name TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(source_id, external_id)
);

-- Locations by display label and country
CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    country TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    UNIQUE(label, country)
);

-- Listings, immutable once created
CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    url TEXT,
    price_cents INTEGER CHECK (price_cents IS NULL OR price_cents >= 0),
    currency TEXT,
    seller_id INTEGER REFERENCES sellers(id),
    location_id INTEGER REFERENCES locations(id),
    first_seen_at TEXT NOT NULL,
    UNIQUE(source_id, external_id)
);

CREATE INDEX IF NOT EXISTS idx_listings_source ON listings(source_id);
CREATE INDEX IF NOT EXISTS idx_listings_seller ON listings(seller_id);

-- Listing images in page order
CREATE TABLE IF NOT EXISTS listing_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id INTEGER NOT NULL REFERENCES listings(id),
    position INTEGER NOT NULL,
    url TEXT NOT NULL,
    UNIQUE(listing_id, url)
);

CREATE INDEX IF NOT EXISTS idx_listing_images_listing ON listing_images(listing_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
