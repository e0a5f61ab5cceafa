//! Connection management subsystem.
//!
//! # Data Flow
//! ```text
//! ConnectionPreset (ordered endpoints)
//!     → controller.rs (probe candidates in order, memoize the attempt)
//!     → active.rs (ActiveConnection + health state)
//!     → with_transport(f) / with_connection(f) hand it to callers
//!
//! health.rs:
//!     Periodic timer
//!     → Probe active transport
//!     → Mark unhealthy after threshold
//!     → Next with_transport reselects from the first candidate
//! ```
//!
//! # Design Decisions
//! - Exactly one active connection per client
//! - Concurrent callers share one connect attempt
//! - Preset switches wait for in-flight scoped uses
//! - No subscription or message events originate here

pub mod active;
pub mod controller;
pub mod health;

pub use active::{ActiveConnection, ConnectionHealth, HealthState};
pub use controller::{CandidateFailure, ConnectionController, ConnectionError, ConnectionResult};
pub use health::HealthMonitor;
