//! Network transport abstraction.
//!
//! # Data Flow
//! ```text
//! ConnectionPreset (kind + endpoint)
//!     → TransportFactory::connect
//!     → Transport (reads, broadcast, subscribe)
//!     → TransportStream of TransportEvent per subscribed address
//! ```
//!
//! # Design Decisions
//! - One trait covers every protocol kind; the factory decides which kinds it supports
//! - Subscriptions are streams; dropping the stream tears down the transport side
//! - Transports deliver a batch of transactions before the state that includes them

pub mod jrpc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{EndpointConfig, ProtocolKind};
use crate::ledger::{
    Address, ContractState, FullContractState, Hash256, NetworkInfo, SignedMessage, Transaction,
    TransactionsBatchInfo,
};

pub use jrpc::{JrpcTransport, JrpcTransportFactory};

/// Errors raised by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Request could not be delivered or answered.
    #[error("Request failed: {0}")]
    Request(String),

    /// Endpoint answered with an error.
    #[error("Endpoint error {code}: {message}")]
    Endpoint { code: i64, message: String },

    /// Response did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Factory cannot build a transport for this protocol kind.
    #[error("Unsupported protocol: {0}")]
    Unsupported(ProtocolKind),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Update pushed (or polled) for a subscribed address.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// New transactions, in any order.
    TransactionsFound {
        transactions: Vec<Transaction>,
        batch_info: TransactionsBatchInfo,
    },
    /// Latest known account state.
    StateChanged(ContractState),
}

/// Stream of updates for one address.
pub type TransportStream = BoxStream<'static, TransportEvent>;

/// Ledger access through one network endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Probe the endpoint and report the network it serves.
    async fn network_info(&self) -> TransportResult<NetworkInfo>;

    async fn get_full_contract_state(
        &self,
        address: &Address,
    ) -> TransportResult<Option<FullContractState>>;

    /// Transactions of `address` older than `before_lt`, newest first.
    async fn get_transactions(
        &self,
        address: &Address,
        before_lt: Option<u64>,
        limit: u8,
    ) -> TransportResult<Vec<Transaction>>;

    async fn get_transaction(&self, hash: &Hash256) -> TransportResult<Option<Transaction>>;

    async fn get_accounts_by_code_hash(
        &self,
        code_hash: &Hash256,
        limit: u8,
        continuation: Option<&Address>,
    ) -> TransportResult<Vec<Address>>;

    /// Broadcast a signed message.
    async fn send_message(&self, message: &SignedMessage) -> TransportResult<()>;

    /// Open an update stream for `address`.
    async fn subscribe(&self, address: &Address) -> TransportResult<TransportStream>;
}

/// Builds transports for preset endpoints.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        kind: ProtocolKind,
        endpoint: &EndpointConfig,
    ) -> TransportResult<Arc<dyn Transport>>;
}
