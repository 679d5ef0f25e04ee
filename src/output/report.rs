//! Run report types
//!
//! A run report gathers the session summaries of one invocation together with
//! run-wide challenge and egress pool statistics.

use crate::challenge::ChallengeStats;
use crate::egress::PoolStats;
use crate::session::{SessionOutcome, SessionSummary};
use crate::storage::RunStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Summary of one crawl run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Option<i64>,
    pub source_id: String,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sessions: Vec<SessionSummary>,
    /// Challenge counters summed over every session
    pub challenges: ChallengeStats,
    pub pool: PoolStats,
}

impl RunReport {
    pub fn new(
        run_id: Option<i64>,
        source_id: &str,
        config_hash: &str,
        started_at: DateTime<Utc>,
        sessions: Vec<SessionSummary>,
        pool: PoolStats,
    ) -> Self {
        let mut challenges = ChallengeStats::default();
        for session in &sessions {
            challenges.merge(&session.challenge_stats);
        }

        Self {
            run_id,
            source_id: source_id.to_string(),
            config_hash: config_hash.to_string(),
            started_at,
            finished_at: Utc::now(),
            sessions,
            challenges,
            pool,
        }
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    pub fn count_outcome(&self, outcome: SessionOutcome) -> usize {
        self.sessions.iter().filter(|s| s.outcome == outcome).count()
    }

    pub fn total_saved(&self) -> u64 {
        self.sessions.iter().map(|s| s.saved).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.sessions.iter().map(|s| s.skipped).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.sessions.iter().map(|s| s.dropped).sum()
    }

    pub fn total_pages(&self) -> u64 {
        self.sessions.iter().map(|s| u64::from(s.pages_fetched)).sum()
    }

    pub fn total_requests(&self) -> u64 {
        self.sessions.iter().map(|s| s.requests_made).sum()
    }

    /// Final status recorded for the run
    ///
    /// Any cancelled session marks the run interrupted.
    pub fn status(&self) -> RunStatus {
        if self.count_outcome(SessionOutcome::Cancelled) > 0 {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        }
    }
}

/// Prints a run report to stdout
pub fn print_run_report(report: &RunReport) {
    println!("=== Run Summary ===\n");

    if let Some(run_id) = report.run_id {
        println!("Run: {}", run_id);
    }
    println!("Source: {}", report.source_id);
    println!("Duration: {}s", report.duration_seconds());
    println!();

    println!("Sessions:");
    for session in &report.sessions {
        println!(
            "  {} [{}] {}: pages {}, requests {}, saved {}, skipped {}, dropped {}",
            session.query,
            session.outcome,
            session.reason,
            session.pages_fetched,
            session.requests_made,
            session.saved,
            session.skipped,
            session.dropped
        );
    }
    println!();

    println!("Totals:");
    println!("  Pages fetched: {}", report.total_pages());
    println!("  Requests made: {}", report.total_requests());
    println!("  Listings saved: {}", report.total_saved());
    println!("  Listings skipped: {}", report.total_skipped());
    println!("  Listings dropped: {}", report.total_dropped());
    println!();

    println!("Challenges:");
    println!("  Detected: {}", report.challenges.detected);
    println!("  Resolved: {}", report.challenges.total_resolved());
    println!("  Failed: {}", report.challenges.failed);
    println!("  Skipped: {}", report.challenges.skipped);
    for (strategy, attempted) in &report.challenges.attempted {
        let resolved = report.challenges.resolved.get(strategy).unwrap_or(&0);
        println!("  - {}: {} attempted, {} resolved", strategy, attempted, resolved);
    }
    println!();

    println!("Egress pool:");
    println!(
        "  {} points, {} active, {} quarantined",
        report.pool.total, report.pool.active, report.pool.quarantined
    );
    println!(
        "  {} quarantine events, {} reactivations",
        report.pool.quarantine_events, report.pool.reactivations
    );
}
