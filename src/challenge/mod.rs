//! Challenge detection and resolution
//!
//! The detector turns a response into a [`ChallengeVerdict`]. When a verdict is
//! suspected, the [`ChallengeResolver`] walks an ordered strategy chain (header
//! swap, timed backoff, egress rotation, manual intervention) and re-probes the
//! target after each applied strategy until one clears it.

mod detector;
mod operator;
mod resolver;
mod strategies;

pub use detector::{
    default_signatures, ChallengeDetector, ChallengeVerdict, SignatureGroup, SoftBlockKind,
};
pub use operator::{
    challenge_key, FileOperatorChannel, OperatorChannel, OperatorDecision, PendingChallenge,
};
pub use resolver::{ChallengeProbe, ChallengeResolver, ChallengeStats, ProbeOutcome, Resolution};
pub use strategies::{
    ChallengeEvidence, EgressRotation, HeaderSwap, ManualIntervention, ResolutionContext,
    ResolutionStrategy, StrategyOutcome, TimedBackoff,
};
