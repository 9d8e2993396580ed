//! Retry logic with exponential backoff for failed transfer attempts.
//!
//! Every failure except a user cancel shares one retry budget. Between
//! attempts the worker waits
//!
//! ```text
//! nominal = min(base_delay * multiplier^(attempt - 1), max_delay)
//! delay   = nominal + uniform(-jitter_ratio, +jitter_ratio) * nominal
//! ```
//!
//! With defaults the nominal delays are 2s, 4s, 8s, 16s (five attempts, four
//! waits), each spread by up to ±50% so parallel retries desynchronize.
//!
//! # Example
//!
//! ```
//! use fsqd_core::download::{DownloadError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/free/1", 503);
//!
//! match policy.should_retry(&error, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff (2 seconds).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default maximum delay cap (30 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default symmetric jitter as a fraction of the nominal delay.
const DEFAULT_JITTER_RATIO: f64 = 0.5;

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `base_delay`: 2 seconds
/// - `max_delay`: 30 seconds
/// - `backoff_multiplier`: 2.0
/// - `jitter_ratio`: 0.5
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Nominal delay after the first failed attempt.
    base_delay: Duration,

    /// Cap applied to the nominal delay before jitter.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_multiplier: f64,

    /// Jitter spread as a fraction of the nominal delay, in `[0, 1]`.
    jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1 and `jitter_ratio` to `[0, 1]`.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        jitter_ratio: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    ///
    /// A cancellation is never retried; every other error is retried until
    /// the budget is spent.
    #[instrument(level = "debug", skip(self, error), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, error: &DownloadError, attempt: u32) -> RetryDecision {
        if error.is_cancelled() {
            return RetryDecision::DoNotRetry {
                reason: "cancelled by user".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Nominal (jitter-free) delay after `attempt` failed. Non-decreasing in
    /// `attempt` and never above `max_delay`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Nominal delay with symmetric random jitter applied.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter_ratio <= 0.0 {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio);
        nominal.mul_f64(1.0 + factor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn transient() -> DownloadError {
        DownloadError::http_status("https://example.com/free/1", 503)
    }

    // ==================== Delay Tests ====================

    #[test]
    fn test_nominal_delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(2));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(4));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(8));
        assert_eq!(policy.nominal_delay(4), Duration::from_secs(16));
    }

    #[test]
    fn test_nominal_delay_capped_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(5), Duration::from_secs(30));
        assert_eq!(policy.nominal_delay(50), Duration::from_secs(30));
        assert_eq!(policy.nominal_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_nominal_delays_non_decreasing() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=10).map(|a| policy.nominal_delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            let nominal = policy.nominal_delay(attempt);
            for _ in 0..200 {
                let delay = policy.backoff_delay(attempt);
                assert!(delay >= nominal.mul_f64(0.5), "{delay:?} below range");
                assert!(delay <= nominal.mul_f64(1.5), "{delay:?} above range");
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(10),
            Duration::from_millis(40),
            2.0,
            0.0,
        );
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(40));
    }

    // ==================== Decision Tests ====================

    #[test]
    fn test_should_retry_until_budget_spent() {
        let policy = RetryPolicy::default();
        for attempt in 1..5 {
            match policy.should_retry(&transient(), attempt) {
                RetryDecision::Retry { attempt: next, .. } => assert_eq!(next, attempt + 1),
                RetryDecision::DoNotRetry { reason } => panic!("unexpected stop: {reason}"),
            }
        }
        assert!(matches!(
            policy.should_retry(&transient(), 5),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_resolution_style_errors_share_budget() {
        let policy = RetryPolicy::default();
        let error = DownloadError::unexpected_content_type("https://example.com/x", "text/html");
        assert!(matches!(
            policy.should_retry(&error, 1),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_cancelled_never_retried() {
        let policy = RetryPolicy::default();
        match policy.should_retry(&DownloadError::Cancelled, 1) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("cancelled")),
            RetryDecision::Retry { .. } => panic!("cancel must not be retried"),
        }
    }

    #[test]
    fn test_new_clamps_inputs() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, 2.0, 7.0);
        assert_eq!(policy.max_attempts(), 1);
        assert!((policy.jitter_ratio - 1.0).abs() < f64::EPSILON);
    }
}
