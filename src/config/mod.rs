//! Configuration module for Gleaner
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and reading egress point lists.
//!
//! # Example
//!
//! ```no_run
//! use gleaner::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("gleaner.toml")).unwrap();
//! println!("Duplicate threshold: {}", config.session.duplicate_threshold);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackoffConfig, ChallengeConfig, Config, EgressConfig, ExtractConfig, OutputConfig,
    QueryEntry, SessionConfig, SignatureEntry, SourceConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, load_egress_entries};
