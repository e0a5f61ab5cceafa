//! Contract subscription subsystem.
//!
//! # Data Flow
//! ```text
//! subscribe_to_contract(address, kinds)
//!     → controller.rs (per-address slot, ref count)
//!     → Transport::subscribe on 0→1
//!     → driver task consumes the TransportStream
//!         → state.rs (sort batch, drop lt ≤ last seen)
//!         → pending.rs (resolve sends by inbound message hash)
//!         → ProviderEvent to the session, filtered by kinds
//!
//! send_message(address, message)
//!     → register pending → internal subscribe → broadcast
//!     → confirmation, ledger-time expiry or local expiry timer
//! ```
//!
//! # Design Decisions
//! - Ref-count changes for one address are serialized by an async mutex
//! - A transport subscription exists iff the ref count is positive
//! - Sends are never cancelled by unsubscribing; each waiter owns its timer

pub mod controller;
pub mod pending;
pub mod state;

pub use controller::SubscriptionController;
pub use pending::{PendingMessage, PendingMessages};
pub use state::{ContractSubscriptionState, SubscriptionState, UpdateKinds};
