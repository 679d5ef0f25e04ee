use crate::config::BackoffConfig;
use crate::retry::backoff::BackoffPolicy;
use std::time::Duration;

/// Kind of transport-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Connect,
    Other,
}

/// What one attempt produced, as far as retry policy is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// No HTTP response was received
    Transport {
        kind: TransportFailure,
        message: String,
    },
    /// A response arrived; `challenged` is the detector's verdict
    Response { status: u16, challenged: bool },
}

/// Retry classification of an attempt outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Success,
    RetryableTransient,
    RetryableBlocked,
    Fatal,
}

/// Classifies an attempt outcome
///
/// | Outcome | Classification |
/// |---------|----------------|
/// | transport error, timeout | RetryableTransient |
/// | challenge page, any status | RetryableBlocked |
/// | 403, 429 | RetryableBlocked |
/// | 2xx | Success |
/// | 5xx | RetryableTransient |
/// | anything else | Fatal |
pub fn classify(outcome: &AttemptOutcome) -> Classification {
    match outcome {
        AttemptOutcome::Transport { .. } => Classification::RetryableTransient,
        AttemptOutcome::Response {
            challenged: true, ..
        } => Classification::RetryableBlocked,
        AttemptOutcome::Response { status, .. } => match *status {
            403 | 429 => Classification::RetryableBlocked,
            200..=299 => Classification::Success,
            500..=599 => Classification::RetryableTransient,
            _ => Classification::Fatal,
        },
    }
}

/// Decision after a retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Per-fetch retry state
///
/// Transient and blocked failures are budgeted separately. Both counters reset on
/// the first success.
#[derive(Debug, Clone)]
pub struct RetryController {
    backoff: BackoffPolicy,
    max_transient_attempts: u32,
    max_blocked_attempts: u32,
    transient_failures: u32,
    blocked_failures: u32,
}

impl RetryController {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            backoff: BackoffPolicy::from_config(config),
            max_transient_attempts: config.max_transient_attempts.max(1),
            max_blocked_attempts: config.max_blocked_attempts.max(1),
            transient_failures: 0,
            blocked_failures: 0,
        }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Number of failed attempts since the last success
    pub fn attempt(&self) -> u32 {
        self.transient_failures + self.blocked_failures
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.backoff.next_delay(attempt)
    }

    /// Records a failed attempt and decides whether another one is allowed
    ///
    /// `Success` and `Fatal` never retry; use `record_success` for the former.
    pub fn on_failure(&mut self, classification: Classification) -> RetryDecision {
        let (failures, limit) = match classification {
            Classification::RetryableTransient => {
                self.transient_failures += 1;
                (self.transient_failures, self.max_transient_attempts)
            }
            Classification::RetryableBlocked => {
                self.blocked_failures += 1;
                (self.blocked_failures, self.max_blocked_attempts)
            }
            Classification::Success | Classification::Fatal => return RetryDecision::GiveUp,
        };

        if failures >= limit {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.backoff.next_delay(failures - 1))
        }
    }

    pub fn record_success(&mut self) {
        self.transient_failures = 0;
        self.blocked_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> AttemptOutcome {
        AttemptOutcome::Response {
            status,
            challenged: false,
        }
    }

    #[test]
    fn test_classify_statuses() {
        assert_eq!(classify(&response(200)), Classification::Success);
        assert_eq!(classify(&response(204)), Classification::Success);
        assert_eq!(classify(&response(403)), Classification::RetryableBlocked);
        assert_eq!(classify(&response(429)), Classification::RetryableBlocked);
        assert_eq!(classify(&response(500)), Classification::RetryableTransient);
        assert_eq!(classify(&response(503)), Classification::RetryableTransient);
        assert_eq!(classify(&response(404)), Classification::Fatal);
        assert_eq!(classify(&response(410)), Classification::Fatal);
    }

    #[test]
    fn test_classify_transport_errors() {
        let timeout = AttemptOutcome::Transport {
            kind: TransportFailure::Timeout,
            message: "timed out".to_string(),
        };
        assert_eq!(classify(&timeout), Classification::RetryableTransient);
    }

    #[test]
    fn test_classify_challenge_body() {
        let challenged = AttemptOutcome::Response {
            status: 200,
            challenged: true,
        };
        assert_eq!(classify(&challenged), Classification::RetryableBlocked);

        let challenged_503 = AttemptOutcome::Response {
            status: 503,
            challenged: true,
        };
        assert_eq!(classify(&challenged_503), Classification::RetryableBlocked);
    }

    fn controller() -> RetryController {
        RetryController::new(&BackoffConfig {
            base_ms: 10,
            cap_ms: 100,
            multiplier: 2.0,
            max_transient_attempts: 3,
            max_blocked_attempts: 5,
        })
    }

    #[test]
    fn test_transient_budget() {
        let mut retry = controller();
        assert!(matches!(
            retry.on_failure(Classification::RetryableTransient),
            RetryDecision::Retry(_)
        ));
        assert!(matches!(
            retry.on_failure(Classification::RetryableTransient),
            RetryDecision::Retry(_)
        ));
        assert_eq!(
            retry.on_failure(Classification::RetryableTransient),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_blocked_budget_is_separate() {
        let mut retry = controller();
        retry.on_failure(Classification::RetryableTransient);
        retry.on_failure(Classification::RetryableTransient);

        for _ in 0..4 {
            assert!(matches!(
                retry.on_failure(Classification::RetryableBlocked),
                RetryDecision::Retry(_)
            ));
        }
        assert_eq!(
            retry.on_failure(Classification::RetryableBlocked),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut retry = controller();
        retry.on_failure(Classification::RetryableTransient);
        retry.on_failure(Classification::RetryableTransient);
        assert_eq!(retry.attempt(), 2);

        retry.record_success();
        assert_eq!(retry.attempt(), 0);
        assert!(matches!(
            retry.on_failure(Classification::RetryableTransient),
            RetryDecision::Retry(_)
        ));
    }

    #[test]
    fn test_fatal_never_retries() {
        let mut retry = controller();
        assert_eq!(retry.on_failure(Classification::Fatal), RetryDecision::GiveUp);
    }

    #[test]
    fn test_retry_delay_within_cap() {
        let mut retry = controller();
        for _ in 0..4 {
            if let RetryDecision::Retry(delay) = retry.on_failure(Classification::RetryableBlocked)
            {
                assert!(delay <= Duration::from_millis(100));
            }
        }
    }
}
