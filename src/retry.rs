//! Retry policies for concurrent-modification conflicts.
//!
//! The reconciler consults a [`RetryPolicy`] only when a cycle fails with
//! [`ReconcileError::Conflict`](crate::ReconcileError::Conflict). Every other
//! error is terminal.

use rand::Rng;
use std::time::Duration;

/// Decides whether and how long to wait before another reconciliation cycle.
pub trait RetryPolicy: Send + Sync {
    /// The delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` is the number of attempts made so far, starting at 1.
    fn next_delay(&self, operation: &str, attempt: u32) -> Option<Duration>;
}

/// Jittered exponential backoff with a finite attempt cap.
///
/// The delay before attempt `n + 1` is drawn uniformly from
/// `[0, min(max_delay, base_delay * multiplier^(n - 1))]` when jitter is on.
///
/// # Example
///
/// ```
/// use hemmer_reconciler::retry::{ExponentialBackoff, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = ExponentialBackoff::new()
///     .with_max_attempts(3)
///     .with_base_delay(Duration::from_millis(100))
///     .without_jitter();
///
/// assert_eq!(policy.next_delay("apply", 1), Some(Duration::from_millis(100)));
/// assert_eq!(policy.next_delay("apply", 2), Some(Duration::from_millis(200)));
/// assert_eq!(policy.next_delay("apply", 3), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Draw the delay uniformly from zero to the computed bound.
    pub jitter: bool,
}

impl ExponentialBackoff {
    /// Create a policy with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the second attempt.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the upper bound on any single delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Use the computed bound as the delay.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn bound(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.max(1.0).powi(exponent);
        if nanos.is_finite() && nanos < self.max_delay.as_nanos() as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            self.max_delay
        }
    }
}

impl Default for ExponentialBackoff {
    /// Default: 5 attempts, 500ms base delay, 30s cap, doubling, full jitter.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, _operation: &str, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let bound = self.bound(attempt);
        if self.jitter && !bound.is_zero() {
            let nanos = rand::thread_rng().gen_range(0..=bound.as_nanos());
            Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
        } else {
            Some(bound)
        }
    }
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _operation: &str, _attempt: u32) -> Option<Duration> {
        None
    }
}
