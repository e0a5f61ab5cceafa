//! Wallet-side ledger client.
//!
//! Keeps one healthy connection to a preset of redundant gateways, tracks
//! reference-counted account subscriptions, and delivers signed messages with
//! bounded retries and local-execution fallback.

pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod observability;
pub mod provider;
pub mod resilience;
pub mod subscription;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, ErrorCode};
pub use lifecycle::Shutdown;
pub use provider::{ProviderError, ProviderEvent, ProviderRequest, ProviderResponse, ProviderSession};
