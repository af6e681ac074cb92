//! Bounded exponential backoff for failed sync pushes.
//!
//! A failed push is retried automatically after a growing delay, but only a
//! limited number of times. Once the budget is spent the reconciler waits for
//! the next local change (or sign-in) instead of hammering a dead remote.

use std::time::Duration;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Consecutive failures after which automatic retries stop.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            max_retries: 5,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Failure counter for one sync target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backoff {
    failures: u32,
}

impl Backoff {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Delay before the next automatic retry, or `None` when there have been
    /// no failures or the retry budget is exhausted.
    pub fn retry_delay(&self, config: &BackoffConfig) -> Option<Duration> {
        if self.failures == 0 || self.failures > config.max_retries {
            return None;
        }
        let mut delay = config.initial_delay.min(config.max_delay);
        for _ in 1..self.failures {
            delay = next_delay(delay, config);
        }
        Some(delay)
    }

    /// Delay for a push triggered by a local change: the debounce window,
    /// stretched to the current backoff delay while failures persist.
    pub fn schedule_delay(&self, window: Duration, config: &BackoffConfig) -> Duration {
        match self.retry_delay(config) {
            Some(delay) => delay.max(window),
            None => window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles() {
        let config = BackoffConfig::default();
        assert_eq!(next_delay(Duration::from_secs(2), &config), Duration::from_secs(4));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(10));
    }

    #[test]
    fn retry_delay_grows_then_stops() {
        let config = BackoffConfig {
            max_retries: 3,
            ..Default::default()
        };
        let mut backoff = Backoff::default();
        assert_eq!(backoff.retry_delay(&config), None);

        backoff.record_failure();
        assert_eq!(backoff.retry_delay(&config), Some(Duration::from_secs(2)));
        backoff.record_failure();
        assert_eq!(backoff.retry_delay(&config), Some(Duration::from_secs(4)));
        backoff.record_failure();
        assert_eq!(backoff.retry_delay(&config), Some(Duration::from_secs(8)));
        backoff.record_failure();
        assert_eq!(backoff.retry_delay(&config), None);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn schedule_delay_never_undercuts_window() {
        let config = BackoffConfig::default();
        let mut backoff = Backoff::default();
        let window = Duration::from_secs(3);

        assert_eq!(backoff.schedule_delay(window, &config), window);
        backoff.record_failure();
        assert_eq!(backoff.schedule_delay(window, &config), window);
        backoff.record_failure();
        assert_eq!(backoff.schedule_delay(window, &config), Duration::from_secs(4));
    }
}
