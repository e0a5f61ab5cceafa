//! Provider session: the request-level surface of the client.
//!
//! # Data Flow
//! ```text
//! ProviderRequest (request.rs)
//!     → session.rs: validate (repack addresses, amounts, limits)
//!     → dispatch to one handler per variant
//!         reads   → ConnectionController::with_transport
//!         subscriptions → SubscriptionController
//!         sends   → SendCoordinator → SubscriptionController
//!     → ProviderResponse | ProviderError (error.rs)
//!
//! Controllers → EventSender → forwarder task → EventSink (events.rs)
//! ```
//!
//! # Design Decisions
//! - Sessions are built inert; attaching a sink starts event delivery
//! - Events raised before a sink is attached are buffered up to `EVENT_BUFFER`;
//!   past that they are dropped with a warning
//! - Output decoding is best effort and never fails a send

pub mod error;
pub mod events;
pub mod request;
pub mod session;

pub use error::{ErrorBody, ProviderError};
pub use events::{EventSender, EventSink, ProviderEvent, EVENT_BUFFER};
pub use request::{
    DelayedMessage, NetworkSelection, ProviderRequest, ProviderResponse, ProviderState,
    SendExternalMessageParams, SendMessageParams, SendUnsignedExternalMessageParams,
};
pub use session::{decode_output, Collaborators, ProviderSession};
