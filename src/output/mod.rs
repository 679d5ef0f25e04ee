//! Output module for run reports and listing statistics
//!
//! This module handles:
//! - Summarizing a run's sessions, challenges and egress pool
//! - Writing the run report as markdown
//! - Printing statistics about stored listings

mod markdown;
mod report;
pub mod stats;

pub use markdown::{format_markdown_report, write_markdown_report};
pub use report::{print_run_report, OutputError, OutputResult, RunReport};
pub use stats::{load_statistics, print_statistics, ListingStatistics};
