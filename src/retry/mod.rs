//! Retry and backoff policy
//!
//! Pure policy with no I/O: classify an attempt outcome, then decide whether to
//! retry and how long to wait. Nothing in this module returns an error.

mod backoff;
mod policy;

pub use backoff::BackoffPolicy;
pub use policy::{
    classify, AttemptOutcome, Classification, RetryController, RetryDecision, TransportFailure,
};
