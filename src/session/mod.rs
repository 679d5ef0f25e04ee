//! Crawl sessions
//!
//! A session crawls the paginated results of one query and always ends in one
//! of four outcomes: completed, abandoned for duplicates, abandoned on a fatal
//! error, or cancelled.

mod orchestrator;
mod pacing;
mod state;

pub use orchestrator::Orchestrator;
pub use pacing::{time_of_day_factor, Pacer};
pub use state::{
    CrawlSession, DuplicatePolicy, SessionOutcome, SessionState, SessionSummary, StopReason,
};
