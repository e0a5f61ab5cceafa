//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Polling transport failure:
//!     → backoff.rs (exponential delay with jitter before the next poll)
//!
//! Message delivery:
//!     → retries.rs (attempt budget and growing expiration timeouts)
//! ```
//!
//! # Design Decisions
//! - An expired attempt is a retry signal, not an error
//! - The only deadline on a send is the message's own expiration

pub mod backoff;
pub mod retries;

pub use backoff::PollBackoff;
pub use retries::RetryPolicy;
