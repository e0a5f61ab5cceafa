//! Message delivery subsystem.
//!
//! # Data Flow
//! ```text
//! compose.rs: MessageSource (transfer / signed external / unsigned external)
//!     → coordinator.rs: SendCoordinator
//!         Composing → Sent → Confirmed
//!                        → Retrying → Composing (timeout grows)
//!                        → LocalFallback → Expired { exit_code }
//!         forced local: LocalFallback → ConfirmedLocal
//!     → DeliveryChannel (the subscription controller)
//! ```
//!
//! # Design Decisions
//! - Every attempt composes a fresh message with its own expiration
//! - At most one attempt is outstanding, so at most one can confirm
//! - Local execution after exhaustion only explains the failure

pub mod compose;
pub mod coordinator;

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::ledger::{Address, SignedMessage, Transaction};

pub use compose::{ExternalMessageSource, MessageSource, TransferSource};
pub use coordinator::{
    FallbackReason, SendCoordinator, SendState, LOCAL_EXECUTION_TIMEOUT_SECS,
};

/// Send primitives the coordinator drives.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Broadcast and wait for confirmation; `None` once the message expired.
    async fn send_message(&self, address: &Address, message: &SignedMessage) -> Option<Transaction>;

    /// Execute without broadcasting.
    async fn send_message_locally(
        &self,
        address: &Address,
        message: &SignedMessage,
    ) -> ClientResult<Transaction>;
}
