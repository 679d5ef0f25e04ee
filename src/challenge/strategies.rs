use crate::challenge::detector::ChallengeVerdict;
use crate::challenge::operator::{challenge_key, OperatorChannel, OperatorDecision};
use crate::egress::{EgressLease, EgressPool};
use crate::fetch::HeaderProfile;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The response that triggered resolution
#[derive(Debug, Clone)]
pub struct ChallengeEvidence {
    pub status: u16,
    pub verdict: ChallengeVerdict,
    pub body: String,
    /// Server-provided Retry-After, when present
    pub retry_after: Option<Duration>,
}

/// Mutable request context a resolution strategy may change
///
/// Whatever a successful strategy leaves in `headers` and `egress` is what the
/// fetch client continues with.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub source_id: String,
    pub url: String,
    pub evidence: ChallengeEvidence,
    pub headers: HeaderProfile,
    pub egress: Option<EgressLease>,
    pub cancel: CancellationToken,
}

/// Result of applying one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The context was changed; the target should be probed again
    Applied,
    /// The strategy could not do anything useful
    Failed,
    /// Give up on this target without further attempts
    Skip,
    Cancelled,
}

/// One step of the resolution chain
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &mut ResolutionContext) -> StrategyOutcome;
}

/// Replaces the browser header profile with a freshly generated one
#[derive(Debug, Default)]
pub struct HeaderSwap;

#[async_trait]
impl ResolutionStrategy for HeaderSwap {
    fn name(&self) -> &'static str {
        "header-swap"
    }

    async fn apply(&self, ctx: &mut ResolutionContext) -> StrategyOutcome {
        let previous = ctx.headers.name();
        ctx.headers = ctx.headers.regenerate();
        debug!(
            "Swapped header profile {} -> {} for {}",
            previous,
            ctx.headers.name(),
            ctx.url
        );
        StrategyOutcome::Applied
    }
}

/// Sleeps a fixed cooldown, or the server's Retry-After when longer
#[derive(Debug)]
pub struct TimedBackoff {
    cooldown: Duration,
}

impl TimedBackoff {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }
}

#[async_trait]
impl ResolutionStrategy for TimedBackoff {
    fn name(&self) -> &'static str {
        "timed-backoff"
    }

    async fn apply(&self, ctx: &mut ResolutionContext) -> StrategyOutcome {
        let wait = match ctx.evidence.retry_after {
            Some(retry_after) => self.cooldown.max(retry_after),
            None => self.cooldown,
        };
        debug!("Cooling down {:?} before retrying {}", wait, ctx.url);

        tokio::select! {
            _ = ctx.cancel.cancelled() => StrategyOutcome::Cancelled,
            _ = tokio::time::sleep(wait) => StrategyOutcome::Applied,
        }
    }
}

/// Quarantines the current egress point and moves to a different one
pub struct EgressRotation {
    pool: Arc<EgressPool>,
}

impl EgressRotation {
    pub fn new(pool: Arc<EgressPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResolutionStrategy for EgressRotation {
    fn name(&self) -> &'static str {
        "egress-rotation"
    }

    async fn apply(&self, ctx: &mut ResolutionContext) -> StrategyOutcome {
        let current = ctx.egress.as_ref().map(|lease| lease.id);
        if let Some(id) = current {
            self.pool
                .quarantine(id, &format!("challenge on {}", ctx.evidence.verdict));
        }

        match self.pool.acquire_excluding(current) {
            Some(lease) => {
                info!("Rotated egress to {} for {}", lease.endpoint.label(), ctx.url);
                ctx.egress = Some(lease);
                StrategyOutcome::Applied
            }
            None => {
                warn!("No alternative egress point available for {}", ctx.url);
                StrategyOutcome::Failed
            }
        }
    }
}

/// Hands the challenge to a human operator
///
/// Always terminal in the chain. With `wait` disabled it persists the response
/// and fails immediately so the run keeps moving.
pub struct ManualIntervention {
    channel: Arc<dyn OperatorChannel>,
    wait: bool,
}

impl ManualIntervention {
    pub fn new(channel: Arc<dyn OperatorChannel>, wait: bool) -> Self {
        Self { channel, wait }
    }
}

#[async_trait]
impl ResolutionStrategy for ManualIntervention {
    fn name(&self) -> &'static str {
        "manual-intervention"
    }

    async fn apply(&self, ctx: &mut ResolutionContext) -> StrategyOutcome {
        let key = challenge_key(&ctx.source_id, &ctx.url);

        if let Err(e) = self
            .channel
            .persist(&key, &ctx.url, &ctx.evidence.body)
            .await
        {
            warn!("Failed to persist challenge {} for {}: {}", key, ctx.url, e);
            return StrategyOutcome::Failed;
        }

        if !self.wait {
            info!("Challenge {} left pending for operator ({})", key, ctx.url);
            return StrategyOutcome::Failed;
        }

        info!("Waiting for operator decision on challenge {} ({})", key, ctx.url);
        match self.channel.await_decision(&key, &ctx.cancel).await {
            Ok(Some(OperatorDecision::Resolved)) => StrategyOutcome::Applied,
            Ok(Some(OperatorDecision::Skip)) => StrategyOutcome::Skip,
            Ok(None) => StrategyOutcome::Cancelled,
            Err(e) => {
                warn!("Operator channel failed for {}: {}", key, e);
                StrategyOutcome::Failed
            }
        }
    }
}
