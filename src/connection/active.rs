//! The bound transport and its health state.
//!
//! # Responsibilities
//! - Represent the single active connection of a client
//! - Track health state (Healthy/Unhealthy) with hysteresis
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::transport::Transport;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Consecutive-outcome health tracker.
#[derive(Debug)]
pub struct ConnectionHealth {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }
}

impl ConnectionHealth {
    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Healthy or not yet probed.
    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Report a successful probe. Returns true on a transition to Healthy.
    pub fn mark_success(&self, healthy_threshold: usize) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.state() == HealthState::Healthy {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Report a failed probe. Returns true on a transition to Unhealthy.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.state() == HealthState::Unhealthy {
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }
}

/// The transport currently serving a client.
pub struct ActiveConnection {
    pub transport: Arc<dyn Transport>,
    /// Preset group the transport was selected from.
    pub group: String,
    /// Endpoint URL that answered the probe.
    pub endpoint: String,
    /// Network id reported by the endpoint.
    pub network_id: i32,
    pub health: ConnectionHealth,
}

impl ActiveConnection {
    pub fn new(
        transport: Arc<dyn Transport>,
        group: String,
        endpoint: String,
        network_id: i32,
    ) -> Self {
        Self {
            transport,
            group,
            endpoint,
            network_id,
            health: ConnectionHealth::default(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }
}

impl fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("group", &self.group)
            .field("endpoint", &self.endpoint)
            .field("network_id", &self.network_id)
            .field("health", &self.health.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_counts_as_healthy() {
        let health = ConnectionHealth::default();
        assert_eq!(health.state(), HealthState::Unknown);
        assert!(health.is_healthy());
    }

    #[test]
    fn test_single_failure_threshold() {
        let health = ConnectionHealth::default();
        assert!(health.mark_failure(1));
        assert!(!health.is_healthy());
        // Already unhealthy, no second transition
        assert!(!health.mark_failure(1));
    }

    #[test]
    fn test_hysteresis() {
        let health = ConnectionHealth::default();
        assert!(!health.mark_failure(3));
        assert!(!health.mark_failure(3));
        // A success in between resets the failure streak
        health.mark_success(2);
        assert!(!health.mark_failure(3));
        assert!(!health.mark_failure(3));
        assert!(health.is_healthy());
        assert!(health.mark_failure(3));
        assert!(!health.is_healthy());

        assert!(!health.mark_success(2));
        assert!(health.mark_success(2));
        assert_eq!(health.state(), HealthState::Healthy);
    }
}
