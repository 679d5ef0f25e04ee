use crate::challenge::detector::ChallengeVerdict;
use crate::challenge::operator::OperatorChannel;
use crate::challenge::strategies::{
    EgressRotation, HeaderSwap, ManualIntervention, ResolutionContext, ResolutionStrategy,
    StrategyOutcome, TimedBackoff,
};
use crate::config::ChallengeConfig;
use crate::egress::EgressPool;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Result of re-requesting the target after a strategy was applied
#[derive(Debug)]
pub enum ProbeOutcome<T> {
    /// The target answered without a challenge
    Clear(T),
    /// The challenge is gone but the answer is final and unusable (e.g. 404)
    Settled(T),
    /// Still challenged
    Challenged(ChallengeVerdict),
    /// The probe failed for a reason unrelated to the challenge
    Failed(String),
    Cancelled,
}

/// Re-requests the challenged target with the current resolution context
#[async_trait]
pub trait ChallengeProbe: Send {
    type Output: Send;

    async fn probe(&mut self, ctx: &mut ResolutionContext) -> ProbeOutcome<Self::Output>;
}

/// Final result of running the resolution chain
#[derive(Debug)]
pub enum Resolution<T> {
    Resolved { strategy: &'static str, output: T },
    /// The target stopped challenging but answered with a definitive failure
    Settled { output: T },
    /// An operator asked to skip the target
    Skipped,
    Unresolved { verdict: ChallengeVerdict },
    Cancelled,
}

/// Challenge counters for a session or a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeStats {
    pub detected: u64,
    pub attempted: BTreeMap<String, u64>,
    pub resolved: BTreeMap<String, u64>,
    pub failed: u64,
    pub skipped: u64,
}

impl ChallengeStats {
    pub fn total_resolved(&self) -> u64 {
        self.resolved.values().sum()
    }

    pub fn merge(&mut self, other: &ChallengeStats) {
        self.detected += other.detected;
        self.failed += other.failed;
        self.skipped += other.skipped;
        for (name, count) in &other.attempted {
            *self.attempted.entry(name.clone()).or_insert(0) += count;
        }
        for (name, count) in &other.resolved {
            *self.resolved.entry(name.clone()).or_insert(0) += count;
        }
    }
}

/// Ordered chain of resolution strategies
///
/// Strategies run in order. After each applied strategy the target is probed; the
/// first clear probe ends the chain.
pub struct ChallengeResolver {
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl ChallengeResolver {
    pub fn new(strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Builds the standard chain: header swap, timed backoff, egress rotation,
    /// manual intervention
    pub fn standard(
        config: &ChallengeConfig,
        pool: Arc<EgressPool>,
        channel: Arc<dyn OperatorChannel>,
    ) -> Self {
        Self::new(vec![
            Box::new(HeaderSwap),
            Box::new(TimedBackoff::new(Duration::from_secs(config.cooldown_secs))),
            Box::new(EgressRotation::new(pool)),
            Box::new(ManualIntervention::new(channel, config.operator_wait)),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Runs the chain for a suspected challenge
    ///
    /// # Arguments
    ///
    /// * `ctx` - Resolution context; strategies may change its headers and egress
    /// * `probe` - Re-requests the target after each applied strategy
    /// * `stats` - Counters updated with this resolution
    pub async fn resolve<P: ChallengeProbe>(
        &self,
        ctx: &mut ResolutionContext,
        probe: &mut P,
        stats: &mut ChallengeStats,
    ) -> Resolution<P::Output> {
        stats.detected += 1;
        let mut verdict = ctx.evidence.verdict;
        info!("Challenge detected on {}: {}", ctx.url, verdict);

        for strategy in &self.strategies {
            if ctx.cancel.is_cancelled() {
                return Resolution::Cancelled;
            }

            let name = strategy.name();
            *stats.attempted.entry(name.to_string()).or_insert(0) += 1;
            trace!("Resolving {} with {}", ctx.url, name);

            match strategy.apply(ctx).await {
                StrategyOutcome::Applied => {}
                StrategyOutcome::Failed => {
                    debug!("Strategy {} failed for {}", name, ctx.url);
                    continue;
                }
                StrategyOutcome::Skip => {
                    stats.skipped += 1;
                    info!("Target {} skipped by operator", ctx.url);
                    return Resolution::Skipped;
                }
                StrategyOutcome::Cancelled => return Resolution::Cancelled,
            }

            match probe.probe(ctx).await {
                ProbeOutcome::Clear(output) => {
                    *stats.resolved.entry(name.to_string()).or_insert(0) += 1;
                    info!("Challenge on {} resolved by {}", ctx.url, name);
                    return Resolution::Resolved {
                        strategy: name,
                        output,
                    };
                }
                ProbeOutcome::Settled(output) => {
                    info!(
                        "Challenge on {} lifted after {} but the target failed",
                        ctx.url, name
                    );
                    return Resolution::Settled { output };
                }
                ProbeOutcome::Challenged(next) => {
                    debug!("Still challenged after {}: {}", name, next);
                    verdict = next;
                }
                ProbeOutcome::Failed(reason) => {
                    debug!("Probe after {} failed: {}", name, reason);
                }
                ProbeOutcome::Cancelled => return Resolution::Cancelled,
            }
        }

        stats.failed += 1;
        warn!("Challenge on {} unresolved ({})", ctx.url, verdict);
        Resolution::Unresolved { verdict }
    }
}
