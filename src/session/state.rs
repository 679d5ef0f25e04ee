use crate::challenge::ChallengeStats;
use crate::config::{QueryEntry, SessionConfig};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::trace;

/// Position of a session in its page loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Fetching { page: u32 },
    Extracting { page: u32 },
    DuplicateCheck { page: u32 },
    Continuing { page: u32 },
    Stopping,
}

/// Terminal classification reported for every session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOutcome {
    Completed,
    AbandonedDuplicates,
    AbandonedFatal,
    Cancelled,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::AbandonedDuplicates => "abandoned-duplicates",
            Self::AbandonedFatal => "abandoned-fatal",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    NoNextPage,
    PageLimit,
    DuplicateThreshold { sampled: usize, duplicates: usize },
    FatalError(String),
    /// An operator chose to skip a challenged page
    OperatorSkip(String),
    Cancelled,
}

impl StopReason {
    pub fn outcome(&self) -> SessionOutcome {
        match self {
            Self::NoNextPage | Self::PageLimit => SessionOutcome::Completed,
            Self::DuplicateThreshold { .. } => SessionOutcome::AbandonedDuplicates,
            Self::FatalError(_) | Self::OperatorSkip(_) => SessionOutcome::AbandonedFatal,
            Self::Cancelled => SessionOutcome::Cancelled,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNextPage => write!(f, "no next page"),
            Self::PageLimit => write!(f, "page limit reached"),
            Self::DuplicateThreshold {
                sampled,
                duplicates,
            } => write!(f, "{}/{} sampled listings already stored", duplicates, sampled),
            Self::FatalError(message) => write!(f, "{}", message),
            Self::OperatorSkip(url) => write!(f, "skipped by operator ({})", url),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Early-abandon policy for queries whose results are already stored
#[derive(Debug, Clone)]
pub struct DuplicatePolicy {
    pub threshold: f64,
    pub min_sample_size: usize,
    pub sample_size: usize,
    pub sample_pages: u32,
}

impl DuplicatePolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            threshold: config.duplicate_threshold,
            min_sample_size: config.min_sample_size,
            sample_size: config.sample_size,
            sample_pages: config.sample_pages,
        }
    }

    /// Whether the page at `page_index` (0-based) is sampled
    pub fn applies_to(&self, page_index: u32) -> bool {
        page_index < self.sample_pages
    }

    /// Number of leading listings sampled from a page of `available` listings
    pub fn sample_len(&self, available: usize) -> usize {
        self.sample_size.min(available)
    }

    /// Decides abandonment from cumulative sample counts
    ///
    /// Abandons only when at least `min_sample_size` listings were sampled and
    /// the duplicate rate reaches the threshold.
    pub fn should_abandon(&self, sampled: usize, duplicates: usize) -> bool {
        if sampled == 0 || sampled < self.min_sample_size {
            return false;
        }
        duplicates as f64 / sampled as f64 >= self.threshold
    }
}

/// Mutable state of one query crawl
#[derive(Debug)]
pub struct CrawlSession {
    pub query: String,
    pub start_url: String,
    pub current_url: Option<String>,
    pub state: SessionState,
    pub pages_fetched: u32,
    pub listings_seen: u64,
    pub saved: u64,
    pub skipped: u64,
    /// Records rejected by storage constraints
    pub dropped: u64,
    pub sampled: usize,
    pub duplicates: usize,
    started_at: DateTime<Utc>,
}

impl CrawlSession {
    pub fn new(query: &QueryEntry) -> Self {
        Self {
            query: query.name.clone(),
            start_url: query.url.clone(),
            current_url: None,
            state: SessionState::Idle,
            pages_fetched: 0,
            listings_seen: 0,
            saved: 0,
            skipped: 0,
            dropped: 0,
            sampled: 0,
            duplicates: 0,
            started_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, next: SessionState) {
        trace!("Session {}: {:?} -> {:?}", self.query, self.state, next);
        self.state = next;
    }

    pub fn into_summary(
        mut self,
        reason: StopReason,
        requests_made: u64,
        challenge_stats: ChallengeStats,
    ) -> SessionSummary {
        self.transition(SessionState::Stopping);
        SessionSummary {
            query: self.query,
            start_url: self.start_url,
            last_url: self.current_url,
            outcome: reason.outcome(),
            reason,
            pages_fetched: self.pages_fetched,
            requests_made,
            listings_seen: self.listings_seen,
            saved: self.saved,
            skipped: self.skipped,
            dropped: self.dropped,
            sampled: self.sampled,
            duplicates: self.duplicates,
            challenge_stats,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Final report of one session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub query: String,
    pub start_url: String,
    pub last_url: Option<String>,
    pub outcome: SessionOutcome,
    pub reason: StopReason,
    pub pages_fetched: u32,
    pub requests_made: u64,
    pub listings_seen: u64,
    pub saved: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub sampled: usize,
    pub duplicates: usize,
    pub challenge_stats: ChallengeStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}
