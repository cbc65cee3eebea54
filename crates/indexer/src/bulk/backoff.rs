//! Retry schedule for failed bulk calls.

use std::time::Duration;

/// Exponential backoff without jitter.
///
/// The delay before retry `k` (zero-based) is `initial_delay * 2^k`; there
/// are at most `max_retries` retries, so a call is attempted at most
/// `1 + max_retries` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    max_retries: u32,
}

impl BackoffPolicy {
    /// Creates an exponential policy.
    pub fn exponential(initial_delay: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay,
            max_retries,
        }
    }

    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self::exponential(Duration::ZERO, 0)
    }

    /// Number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Yields the delay before each retry, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        let initial = self.initial_delay;
        (0..self.max_retries).map(move |k| {
            let factor = 2u32.checked_pow(k).unwrap_or(u32::MAX);
            initial.saturating_mul(factor)
        })
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(50), 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let delays: Vec<_> = BackoffPolicy::default().delays().collect();
        assert_eq!(delays.len(), 8);
        assert_eq!(delays[0], Duration::from_millis(50));
        assert_eq!(delays[1], Duration::from_millis(100));
        assert_eq!(delays[7], Duration::from_millis(6400));
    }

    #[test]
    fn test_no_retries() {
        assert_eq!(BackoffPolicy::no_retries().delays().count(), 0);
    }

    #[test]
    fn test_large_exponent_saturates() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(1), 40);
        let last = policy.delays().last().unwrap();
        assert_eq!(last, Duration::from_secs(1).saturating_mul(u32::MAX));
    }
}
