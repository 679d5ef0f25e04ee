//! Storage traits and error types
//!
//! This module defines the persistence gateway used by crawl sessions and its
//! error types.

use crate::storage::{ListingRecord, LocationKey, RunStatus, SellerKey, SourceCount};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result of saving a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new row was created
    Saved,
    /// The identity already existed; nothing was created
    Skipped,
}

/// Persistence gateway for listings and their related entities
///
/// Implementations must be safe to share between concurrent sessions. Identity
/// uniqueness is enforced by the backend, not by check-then-insert.
pub trait ListingStore: Send + Sync {
    /// Checks whether a listing identity is already stored
    fn exists(&self, source_id: &str, external_id: &str) -> StorageResult<bool>;

    /// Saves a listing, creating its seller and location as needed
    ///
    /// # Returns
    ///
    /// * `Ok(SaveOutcome::Saved)` - A new listing row was created
    /// * `Ok(SaveOutcome::Skipped)` - The identity existed; missing images may
    ///   have been filled in
    /// * `Err(StorageError::ConstraintViolation)` - The record is invalid
    fn save(&self, record: &ListingRecord) -> StorageResult<SaveOutcome>;

    /// Returns the seller id for a natural key, creating it if needed
    fn get_or_create_seller(&self, key: &SellerKey) -> StorageResult<i64>;

    /// Returns the location id for a natural key, creating it if needed
    fn get_or_create_location(&self, key: &LocationKey) -> StorageResult<i64>;

    /// Listing counts grouped by source
    fn count_by_source(&self) -> StorageResult<Vec<SourceCount>>;

    // ===== Run Management =====

    /// Records the start of a crawl run and returns its id
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Marks a run finished with a final status
    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()>;
}
