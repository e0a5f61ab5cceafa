//! Lifecycle management for the client daemon.
//!
//! # Data Flow
//! ```text
//! signals.rs:
//!     SIGINT / SIGTERM → shutdown_signal() resolves
//!
//! shutdown.rs:
//!     Shutdown::trigger → health monitor, config reload loop and
//!     event printer leave their select loops → session closes
//! ```
//!
//! # Design Decisions
//! - Background tasks own a broadcast receiver and exit on their own
//! - Closing the session drops subscriptions; in-flight sends finish or expire

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
