//! Gleaner: a resilient listings crawler
//!
//! This crate crawls a listings marketplace that resists automated access. It keeps
//! a paced, paginated request pipeline alive by rotating egress identity, absorbing
//! soft blocks, reacting to challenge pages, and abandoning queries whose result set
//! has already been ingested.

pub mod challenge;
pub mod config;
pub mod egress;
pub mod extract;
pub mod fetch;
pub mod output;
pub mod retry;
pub mod session;
pub mod storage;

use thiserror::Error;

/// Main error type for Gleaner operations
#[derive(Debug, Error)]
pub enum GleanerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Operator channel error: {0}")]
    Operator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad failure classes used to decide how far an error propagates
///
/// Transient and blocked failures are absorbed inside the fetch client, fatal
/// failures end a session, and data integrity failures drop a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    TransientNetwork,
    Blocked,
    Fatal,
    DataIntegrity,
}

impl GleanerError {
    /// Returns the failure class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Reqwest(e) if e.is_timeout() || e.is_connect() => ErrorClass::TransientNetwork,
            Self::Fetch(fetch::FetchError::Fatal {
                reason: fetch::FatalReason::UnresolvedChallenge(_),
                ..
            }) => ErrorClass::Blocked,
            Self::Storage(storage::StorageError::ConstraintViolation(_)) => {
                ErrorClass::DataIntegrity
            }
            _ => ErrorClass::Fatal,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid egress point '{entry}': {message}")]
    InvalidEgress { entry: String, message: String },

    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),
}

/// Result type alias for Gleaner operations
pub type Result<T> = std::result::Result<T, GleanerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use session::{Orchestrator, SessionOutcome, SessionSummary};
pub use storage::{ListingStore, SaveOutcome, SqliteListingStore};
