//! Delay schedule for failing subscription polls.

use rand::Rng;
use std::time::Duration;

/// Poll interval that doubles per consecutive failure, up to a cap, with up
/// to 10% jitter on top.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    interval: Duration,
    max: Duration,
    failures: u32,
}

impl PollBackoff {
    pub fn new(interval: Duration, max: Duration) -> Self {
        Self {
            interval,
            max: max.max(interval),
            failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Returns the number of consecutive failures so far.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    /// Delay before the next poll.
    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return self.interval;
        }

        let factor = 1u32.checked_shl(self.failures - 1).unwrap_or(u32::MAX);
        let capped = self.interval.saturating_mul(factor).min(self.max);
        capped + jitter(capped)
    }
}

fn jitter(delay: Duration) -> Duration {
    let range = delay.as_millis() as u64 / 10;
    if range == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..range))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_polls_use_interval() {
        let backoff = PollBackoff::new(Duration::from_millis(100), Duration::from_secs(2));
        assert_eq!(backoff.delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_failures_double_delay_up_to_cap() {
        let mut backoff = PollBackoff::new(Duration::from_millis(100), Duration::from_secs(1));

        backoff.record_failure();
        let d1 = backoff.delay().as_millis();
        assert!((100..110).contains(&d1));

        backoff.record_failure();
        assert!(backoff.delay().as_millis() >= 200);

        for _ in 0..40 {
            backoff.record_failure();
        }
        let capped = backoff.delay().as_millis();
        assert!((1000..1100).contains(&capped));

        backoff.record_success();
        assert_eq!(backoff.delay(), Duration::from_millis(100));
    }
}
