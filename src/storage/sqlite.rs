//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ListingStore trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ListingStore, SaveOutcome, StorageError, StorageResult};
use crate::storage::{ListingRecord, LocationKey, RunStatus, SellerKey, SourceCount};
use crate::GleanerError;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// SQLite storage backend
///
/// The connection sits behind a mutex so one store can be shared by every
/// session. Separate stores opened on the same file are also safe: writes run in
/// immediate transactions and wait on the busy timeout.
pub struct SqliteListingStore {
    conn: Mutex<Connection>,
}

impl SqliteListingStore {
    /// Creates a new SqliteListingStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteListingStore)` - Successfully opened/created database
    /// * `Err(GleanerError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, GleanerError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, GleanerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the stored image URLs of a listing in page order
    pub fn image_urls(&self, source_id: &str, external_id: &str) -> StorageResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT li.url FROM listing_images li
             JOIN listings l ON l.id = li.listing_id
             WHERE l.source_id = ?1 AND l.external_id = ?2
             ORDER BY li.position",
        )?;

        let urls = stmt
            .query_map(params![source_id, external_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(urls)
    }

    /// Returns the status of a run, if it exists
    pub fn run_status(&self, run_id: i64) -> StorageResult<Option<RunStatus>> {
        let conn = self.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| RunStatus::from_db_string(&s)))
    }
}

/// Maps constraint failures to `ConstraintViolation`, everything else to `Sqlite`
fn map_write_error(error: rusqlite::Error) -> StorageError {
    match &error {
        rusqlite::Error::SqliteFailure(e, message) if e.code == ErrorCode::ConstraintViolation => {
            StorageError::ConstraintViolation(
                message.clone().unwrap_or_else(|| e.to_string()),
            )
        }
        _ => StorageError::Sqlite(error),
    }
}

fn upsert_seller(conn: &Connection, key: &SellerKey, now: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO sellers (source_id, external_id, name, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(source_id, external_id) DO UPDATE SET name = COALESCE(sellers.name, excluded.name)",
        params![key.source_id, key.external_id, key.name, now],
    )?;

    conn.query_row(
        "SELECT id FROM sellers WHERE source_id = ?1 AND external_id = ?2",
        params![key.source_id, key.external_id],
        |row| row.get(0),
    )
}

fn upsert_location(conn: &Connection, key: &LocationKey, now: &str) -> rusqlite::Result<i64> {
    let country = key.country.as_deref().unwrap_or("");
    conn.execute(
        "INSERT INTO locations (label, country, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(label, country) DO NOTHING",
        params![key.label, country, now],
    )?;

    conn.query_row(
        "SELECT id FROM locations WHERE label = ?1 AND country = ?2",
        params![key.label, country],
        |row| row.get(0),
    )
}

fn insert_images(conn: &Connection, listing_id: i64, urls: &[String]) -> rusqlite::Result<()> {
    for (position, url) in urls.iter().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO listing_images (listing_id, position, url) VALUES (?1, ?2, ?3)",
            params![listing_id, position as i64, url],
        )?;
    }
    Ok(())
}

impl ListingStore for SqliteListingStore {
    fn exists(&self, source_id: &str, external_id: &str) -> StorageResult<bool> {
        let conn = self.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM listings WHERE source_id = ?1 AND external_id = ?2)",
            params![source_id, external_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn save(&self, record: &ListingRecord) -> StorageResult<SaveOutcome> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().to_rfc3339();

        let seller_id = record
            .seller
            .as_ref()
            .map(|key| upsert_seller(&tx, key, &now))
            .transpose()
            .map_err(map_write_error)?;
        let location_id = record
            .location
            .as_ref()
            .map(|key| upsert_location(&tx, key, &now))
            .transpose()
            .map_err(map_write_error)?;

        let inserted = tx
            .execute(
                "INSERT INTO listings (source_id, external_id, title, url, price_cents, currency,
                 seller_id, location_id, first_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(source_id, external_id) DO NOTHING",
                params![
                    record.source_id,
                    record.external_id,
                    record.title,
                    record.url,
                    record.price_cents,
                    record.currency,
                    seller_id,
                    location_id,
                    now
                ],
            )
            .map_err(map_write_error)?;

        let outcome = if inserted == 1 {
            let listing_id = tx.last_insert_rowid();
            insert_images(&tx, listing_id, &record.image_urls).map_err(map_write_error)?;
            SaveOutcome::Saved
        } else {
            let listing_id: i64 = tx.query_row(
                "SELECT id FROM listings WHERE source_id = ?1 AND external_id = ?2",
                params![record.source_id, record.external_id],
                |row| row.get(0),
            )?;
            let image_count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM listing_images WHERE listing_id = ?1",
                params![listing_id],
                |row| row.get(0),
            )?;

            if image_count == 0 && !record.image_urls.is_empty() {
                insert_images(&tx, listing_id, &record.image_urls).map_err(map_write_error)?;
                debug!(
                    "Filled {} images on existing listing {}/{}",
                    record.image_urls.len(),
                    record.source_id,
                    record.external_id
                );
            }
            SaveOutcome::Skipped
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get_or_create_seller(&self, key: &SellerKey) -> StorageResult<i64> {
        let conn = self.lock();
        let now = Utc::now().to_rfc3339();
        upsert_seller(&conn, key, &now).map_err(map_write_error)
    }

    fn get_or_create_location(&self, key: &LocationKey) -> StorageResult<i64> {
        let conn = self.lock();
        let now = Utc::now().to_rfc3339();
        upsert_location(&conn, key, &now).map_err(map_write_error)
    }

    fn count_by_source(&self) -> StorageResult<Vec<SourceCount>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT l.source_id,
                    COUNT(DISTINCT l.id),
                    COUNT(DISTINCT l.seller_id),
                    COUNT(DISTINCT li.listing_id)
             FROM listings l
             LEFT JOIN listing_images li ON li.listing_id = l.id
             GROUP BY l.source_id
             ORDER BY l.source_id",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok(SourceCount {
                    source_id: row.get(0)?,
                    listings: row.get::<_, i64>(1)? as u64,
                    sellers: row.get::<_, i64>(2)? as u64,
                    with_images: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(counts)
    }

    // ===== Run Management =====

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let conn = self.lock();
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }
}
