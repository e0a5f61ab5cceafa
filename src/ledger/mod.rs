//! Ledger domain model and external collaborators.
//!
//! # Data Flow
//! ```text
//! Caller parameters
//!     → runtime.rs (repack addresses, build and sign messages)
//!     → types.rs (SignedMessage, Transaction, ContractState)
//!     → clock.rs (adjusted time for expiry)
//! ```
//!
//! # Security Constraints
//! - Signing goes through `Keystore`/`Signer` only
//! - Never log message bodies or signatures
//!
//! `watch_only.rs` provides collaborators for sessions without keys.

pub mod clock;
pub mod runtime;
pub mod types;
pub mod watch_only;

pub use clock::Clock;
pub use runtime::{
    Account, AccountsStorage, DecodedOutput, ExternalMessageRequest, FunctionCall, Keystore,
    LedgerRuntime, PrepareContext, PublicKey, RuntimeError, RuntimeResult, Signature, Signer,
    TransferParams, UnsignedMessage,
};
pub use types::{
    Address, ContractState, FullContractState, GenTimings, Hash256, Message, NetworkInfo,
    SignedMessage, Transaction, TransactionId, TransactionsBatchInfo,
};
pub use watch_only::{NoKeys, WatchOnlyRuntime};
