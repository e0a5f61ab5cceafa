//! Retry budget for message delivery.
//!
//! # Responsibilities
//! - Clamp the configured attempt count and first timeout to sane minimums
//! - Produce the growing expiration timeout of every attempt
//!
//! # Design Decisions
//! - Growth is cumulative: attempt n uses `timeout * factor^n`
//! - Timeouts stay fractional seconds; callers round when composing

use std::time::Duration;

use crate::config::MessageConfig;

/// Bounded, growing-timeout retry policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    retry_count: u32,
    timeout_secs: f64,
    grow_factor: f64,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, timeout_secs: u32, grow_factor: f64) -> Self {
        let grow_factor = if grow_factor.is_finite() && grow_factor > 0.0 {
            grow_factor
        } else {
            1.0
        };
        Self {
            retry_count: retry_count.max(1),
            timeout_secs: f64::from(timeout_secs.max(1)),
            grow_factor,
        }
    }

    pub fn from_config(config: &MessageConfig) -> Self {
        Self::new(
            config.retry_count,
            config.timeout_secs,
            config.timeout_grow_factor,
        )
    }

    /// Number of network attempts.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Timeout of the first attempt, in seconds.
    pub fn initial_timeout(&self) -> f64 {
        self.timeout_secs
    }

    /// Timeout that follows `timeout` after an expired attempt.
    pub fn grow(&self, timeout: f64) -> f64 {
        timeout * self.grow_factor
    }

    /// Timeouts of every attempt in order, in seconds.
    pub fn timeouts(&self) -> Vec<f64> {
        let mut timeout = self.timeout_secs;
        let mut timeouts = Vec::with_capacity(self.retry_count as usize);
        for _ in 0..self.retry_count {
            timeouts.push(timeout);
            timeout = self.grow(timeout);
        }
        timeouts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MessageConfig::default())
    }
}

/// Convert fractional seconds to a `Duration`, never below one second.
pub fn timeout_duration(timeout_secs: f64) -> Duration {
    if timeout_secs.is_finite() && timeout_secs >= 1.0 {
        Duration::from_secs_f64(timeout_secs)
    } else {
        Duration::from_secs(1)
    }
}
