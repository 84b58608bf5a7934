//! Backoff policy and sleeping
//!
//! Retry loops in droidrig are always bounded. The delay for each attempt comes
//! from [`BackoffPolicy::delay`] and the wait itself goes through a [`Sleeper`], so
//! tests can observe the schedule without waiting for it.

use std::time::Duration;

/// Linear backoff: `base + step * attempt`, saturating at [`Duration::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Added per attempt
    pub step: Duration,
    /// Number of throttled attempts before the final unthrottled one
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            step: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, step: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            step,
            max_attempts,
        }
    }

    /// Delay to wait after the given zero-based attempt failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_add(self.step.saturating_mul(attempt))
    }

    /// The full schedule of throttled waits.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|a| self.delay(a)).collect()
    }
}

/// Blocks the calling thread.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps for real.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_linear() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(3));
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(7));
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_secs(3),
                Duration::from_secs(5),
                Duration::from_secs(7)
            ]
        );
    }

    #[test]
    fn zero_attempts_has_empty_schedule() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::ZERO, 0);
        assert!(policy.schedule().is_empty());
    }

    #[test]
    fn huge_settings_saturate() {
        let policy = BackoffPolicy::new(Duration::from_secs(u64::MAX), Duration::from_secs(u64::MAX), 3);
        assert_eq!(policy.delay(0), Duration::from_secs(u64::MAX));
        assert_eq!(policy.delay(2), Duration::MAX);
    }
}
