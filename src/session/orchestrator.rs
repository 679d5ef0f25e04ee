//! Crawl session orchestrator - per-query page loop
//!
//! Each query runs as one strictly sequential session: pace, fetch, extract,
//! sample for duplicates, persist, follow the next-page link. Sessions for
//! different queries run concurrently up to a configured limit.

use crate::challenge::{FileOperatorChannel, OperatorChannel};
use crate::config::{Config, QueryEntry};
use crate::egress::EgressPool;
use crate::extract::{Extractor, ListingCandidate, SelectorExtractor};
use crate::fetch::{FetchClient, FetchContext, FetchError};
use crate::session::pacing::Pacer;
use crate::session::state::{
    CrawlSession, DuplicatePolicy, SessionState, SessionSummary, StopReason,
};
use crate::storage::{ListingRecord, ListingStore, SaveOutcome};
use crate::{ErrorClass, GleanerError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Runs crawl sessions against shared fetch, extraction and storage collaborators
pub struct Orchestrator {
    config: Arc<Config>,
    fetcher: Arc<FetchClient>,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn ListingStore>,
    pacer: Pacer,
    policy: DuplicatePolicy,
    session_limit: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        fetcher: Arc<FetchClient>,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn ListingStore>,
        cancel: CancellationToken,
    ) -> Self {
        let pacer = Pacer::from_config(&config.session);
        let policy = DuplicatePolicy::from_config(&config.session);
        let session_limit = Arc::new(Semaphore::new(config.session.max_concurrent_sessions.max(1)));

        Self {
            config,
            fetcher,
            extractor,
            store,
            pacer,
            policy,
            session_limit,
            cancel,
        }
    }

    /// Builds the egress pool, fetch client and default extractor from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `store` - Persistence gateway shared by all sessions
    /// * `cancel` - Root cancellation token; each session gets a child token
    pub fn from_config(
        config: Config,
        store: Arc<dyn ListingStore>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let pool = Arc::new(EgressPool::from_config(&config.egress)?);
        let channel: Arc<dyn OperatorChannel> = Arc::new(FileOperatorChannel::new(
            &config.challenge.manual_dir,
            Duration::from_millis(config.challenge.operator_poll_ms),
        ));
        let fetcher = Arc::new(FetchClient::from_config(&config, pool, channel));
        let extractor: Arc<dyn Extractor> = Arc::new(SelectorExtractor::from_config(&config.extract)?);

        Ok(Self::new(Arc::new(config), fetcher, extractor, store, cancel))
    }

    pub fn pool(&self) -> &Arc<EgressPool> {
        self.fetcher.pool()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs one query to a terminal state
    ///
    /// Never fails: every error ends the session with a recorded reason.
    pub async fn start_session(&self, query: &QueryEntry) -> SessionSummary {
        let cancel = self.cancel.child_token();
        let mut session = CrawlSession::new(query);
        let mut ctx = FetchContext::new(&self.config.source.id, cancel);

        info!("Starting session {} at {}", query.name, query.url);
        let reason = self.drive(&mut session, &mut ctx).await;

        let summary = session.into_summary(reason, ctx.requests_made, ctx.challenge_stats);
        info!(
            "Session {} {}: {} ({} pages, {} requests, {} saved, {} skipped)",
            summary.query,
            summary.outcome,
            summary.reason,
            summary.pages_fetched,
            summary.requests_made,
            summary.saved,
            summary.skipped
        );
        summary
    }

    /// Runs every query, at most `max-concurrent-sessions` at a time
    ///
    /// Summaries are returned in query order.
    pub async fn run_queries(self: Arc<Self>, queries: Vec<QueryEntry>) -> Vec<SessionSummary> {
        let mut tasks = JoinSet::new();

        for (index, query) in queries.into_iter().enumerate() {
            let orchestrator = self.clone();
            tasks.spawn(async move {
                let permit = tokio::select! {
                    _ = orchestrator.cancel.cancelled() => None,
                    permit = orchestrator.session_limit.clone().acquire_owned() => permit.ok(),
                };

                let summary = match permit {
                    Some(_permit) => orchestrator.start_session(&query).await,
                    None => CrawlSession::new(&query).into_summary(
                        StopReason::Cancelled,
                        0,
                        Default::default(),
                    ),
                };
                (index, summary)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Session task failed: {}", e),
            }
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, summary)| summary).collect()
    }

    async fn drive(&self, session: &mut CrawlSession, ctx: &mut FetchContext) -> StopReason {
        let mut url = match Url::parse(&session.start_url) {
            Ok(url) => url,
            Err(e) => return StopReason::FatalError(format!("invalid start URL: {}", e)),
        };
        let mut visited: HashSet<Url> = HashSet::new();

        loop {
            let page_index = session.pages_fetched;
            if page_index >= self.config.session.max_pages {
                return StopReason::PageLimit;
            }

            session.transition(SessionState::Fetching { page: page_index });
            session.current_url = Some(url.to_string());
            visited.insert(url.clone());

            if !self.pacer.wait(&ctx.cancel).await {
                return StopReason::Cancelled;
            }

            let page = match self.fetcher.fetch(&url, ctx).await {
                Ok(page) => page,
                Err(FetchError::Cancelled) => return StopReason::Cancelled,
                Err(FetchError::Skipped { url }) => return StopReason::OperatorSkip(url),
                Err(e) => {
                    warn!("Session {} stopped on {}: {}", session.query, url, e);
                    return StopReason::FatalError(e.to_string());
                }
            };
            session.pages_fetched += 1;

            session.transition(SessionState::Extracting { page: page_index });
            let candidates = self.extractor.extract(&page.body, &page.url);
            let next = self.extractor.find_next_page(&page.body, &page.url);
            session.listings_seen += candidates.len() as u64;
            debug!(
                "Page {} of {}: {} listings, next {:?}",
                page_index + 1,
                session.query,
                candidates.len(),
                next.as_ref().map(Url::as_str)
            );

            if self.policy.applies_to(page_index) {
                session.transition(SessionState::DuplicateCheck { page: page_index });
                let page_duplicates = match self.sample_duplicates(&candidates) {
                    Ok((sampled, duplicates)) => {
                        session.sampled += sampled;
                        session.duplicates += duplicates;
                        duplicates
                    }
                    Err(e) => return StopReason::FatalError(e.to_string()),
                };

                if self.policy.should_abandon(session.sampled, session.duplicates) {
                    session.skipped += page_duplicates as u64;
                    info!(
                        "Abandoning {}: {}/{} sampled listings already stored",
                        session.query, session.duplicates, session.sampled
                    );
                    return StopReason::DuplicateThreshold {
                        sampled: session.sampled,
                        duplicates: session.duplicates,
                    };
                }
            }

            if let Err(e) = self.persist(session, &candidates) {
                return StopReason::FatalError(e.to_string());
            }

            match next {
                Some(next) if visited.contains(&next) => {
                    debug!("Next page {} already visited, stopping", next);
                    return StopReason::NoNextPage;
                }
                Some(next) => {
                    session.transition(SessionState::Continuing { page: page_index });
                    ctx.set_referer(&page.url);
                    url = next;
                }
                None => return StopReason::NoNextPage,
            }
        }
    }

    /// Checks the leading listings of a page against storage
    ///
    /// Returns `(sampled, duplicates)`.
    fn sample_duplicates(&self, candidates: &[ListingCandidate]) -> Result<(usize, usize)> {
        let sample = self.policy.sample_len(candidates.len());
        let mut duplicates = 0;

        for candidate in &candidates[..sample] {
            if self
                .store
                .exists(&self.config.source.id, &candidate.external_id)?
            {
                duplicates += 1;
            }
        }

        Ok((sample, duplicates))
    }

    /// Saves every listing of a page
    ///
    /// Records rejected by storage constraints are dropped and counted; any other
    /// storage error is returned.
    fn persist(&self, session: &mut CrawlSession, candidates: &[ListingCandidate]) -> Result<()> {
        for candidate in candidates {
            let record = ListingRecord::from_candidate(&self.config.source.id, candidate);
            match self.store.save(&record) {
                Ok(SaveOutcome::Saved) => session.saved += 1,
                Ok(SaveOutcome::Skipped) => session.skipped += 1,
                Err(e) => {
                    let e = GleanerError::from(e);
                    if e.class() != ErrorClass::DataIntegrity {
                        return Err(e);
                    }
                    warn!(
                        "Dropped listing {} from {}: {}",
                        candidate.external_id, session.query, e
                    );
                    session.dropped += 1;
                }
            }
        }
        Ok(())
    }
}
