//! Retry policy for fetch attempts.
//!
//! Retries are counted separately from the initial attempt: a policy with
//! `max_retries = 3` makes at most four requests for one file.

use std::time::Duration;

/// Default delay before the first retry (1 second).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Default cap on any single backoff delay (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a fetch task handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail on the first error.
    None,

    /// Fixed number of retries with a constant delay.
    Fixed {
        /// Retries after the initial attempt.
        max_retries: u32,
        /// Delay before each retry.
        delay: Duration,
    },

    /// Exponential backoff: the delay grows by `multiplier` after each
    /// failure, capped at `max_delay`.
    ExponentialBackoff {
        /// Retries after the initial attempt.
        max_retries: u32,
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Upper bound for a single delay.
        max_delay: Duration,
        /// Growth factor (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryPolicy {
    /// Exponential backoff with the default delays.
    pub fn exponential(max_retries: u32) -> Self {
        Self::ExponentialBackoff {
            max_retries,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Fixed-delay retries.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    /// Number of retries allowed after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_retries, .. } => *max_retries,
            Self::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Upper bound on any delay produced by this policy.
    pub fn max_delay(&self) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay, .. } => *delay,
            Self::ExponentialBackoff { max_delay, .. } => *max_delay,
        }
    }

    /// Delay before retry number `retry` (1-based), or `None` when the
    /// retry budget is spent.
    pub fn delay_for_retry(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries() {
            return None;
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.powi((retry - 1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let capped = delay_ms.min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(capped as u64))
            }
        }
    }

    /// Delay before retry `retry`, raised to honour an origin `Retry-After`
    /// hint but never above the policy cap.
    pub fn backoff(&self, retry: u32, retry_after: Option<Duration>) -> Option<Duration> {
        let delay = self.delay_for_retry(retry)?;
        Some(match retry_after {
            Some(hint) => delay.max(hint.min(self.max_delay())),
            None => delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.max_retries(), 0);
        assert_eq!(policy.delay_for_retry(1), None);
    }

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_retry(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_retry(3), None);
    }

    #[test]
    fn test_retry_policy_exponential_doubles() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_retry(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_retry(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_retry(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_retry(4), None);
    }

    #[test]
    fn test_retry_policy_exponential_respects_max_delay() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_retry(8), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_backoff_honours_retry_after_within_cap() {
        let policy = RetryPolicy::exponential(3);

        let delay = policy.backoff(1, Some(Duration::from_secs(10))).unwrap();
        assert_eq!(delay, Duration::from_secs(10));

        let delay = policy.backoff(1, Some(Duration::from_secs(3600))).unwrap();
        assert_eq!(delay, Duration::from_secs(DEFAULT_MAX_DELAY_SECS));

        // A short hint never shortens the computed backoff
        let delay = policy.backoff(2, Some(Duration::from_millis(1))).unwrap();
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn test_default_is_three_exponential_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for_retry(1), Some(Duration::from_secs(1)));
    }
}
