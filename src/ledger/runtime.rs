//! External collaborators: ledger runtime, keystore and account storage.
//!
//! # Responsibilities
//! - Describe the narrow surface the client consumes from cryptography,
//!   ABI encoding, address computation and VM execution
//! - Keep signing material out of this crate entirely
//!
//! # Security
//! - Secret keys never cross these traits; only signatures do
//! - Signers may be remote (hardware), so signing is async

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::ledger::clock::Clock;
use crate::ledger::types::{Address, FullContractState, SignedMessage, Transaction};

/// Errors reported by the external collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Signer not found: {0}")]
    SignerNotFound(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// The VM could not run at all (as opposed to running and aborting).
    #[error("Execution failed: {0}")]
    Execution(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Hex-encoded ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(pub String);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base64-encoded signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub String);

/// A contract function call described by its ABI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Contract ABI as JSON text.
    pub abi: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Decoded output of a function call found in a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedOutput {
    pub method: String,
    pub output: serde_json::Value,
}

/// Internal transfer from a stored account.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferParams {
    pub recipient: Address,
    pub amount: u128,
    pub bounce: bool,
    pub payload: Option<FunctionCall>,
}

/// External message addressed to a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalMessageRequest {
    pub recipient: Address,
    /// Base64-encoded state init, for deploying messages.
    pub state_init: Option<String>,
    pub call: FunctionCall,
    /// Key the message is signed with; `None` for unsigned messages.
    pub public_key: Option<PublicKey>,
}

/// A message built but not yet signed.
pub trait UnsignedMessage: Send + Sync {
    /// Bytes the signer must sign.
    fn hash(&self) -> &[u8];

    fn expire_at(&self) -> u32;

    fn sign(&self, signature: &Signature) -> RuntimeResult<SignedMessage>;

    /// Assemble the message with an empty signature slot.
    fn without_signature(&self) -> RuntimeResult<SignedMessage>;
}

/// Cryptography, ABI and VM execution.
pub trait LedgerRuntime: Send + Sync {
    /// Normalize an address to its canonical form.
    fn repack_address(&self, address: &str) -> RuntimeResult<Address>;

    /// Build an external message expiring `timeout` after the clock's now.
    fn create_external_message(
        &self,
        clock: &Clock,
        request: &ExternalMessageRequest,
        timeout: Duration,
    ) -> RuntimeResult<Box<dyn UnsignedMessage>>;

    /// Decode the output of `call` from a transaction.
    fn decode_transaction(
        &self,
        transaction: &Transaction,
        call: &FunctionCall,
    ) -> RuntimeResult<Option<DecodedOutput>>;

    /// Execute a message against an account state without broadcasting it.
    ///
    /// A contract that aborts still produces a transaction carrying an exit
    /// code; only a VM that cannot run returns `RuntimeError::Execution`.
    fn run_local(
        &self,
        clock: &Clock,
        state: Option<&FullContractState>,
        message: &SignedMessage,
    ) -> RuntimeResult<Transaction>;
}

/// A signing capability for one key.
#[async_trait]
pub trait Signer: Send + Sync {
    fn public_key(&self) -> &PublicKey;

    async fn sign(&self, data: &[u8]) -> RuntimeResult<Signature>;
}

#[async_trait]
pub trait Keystore: Send + Sync {
    /// `None` if the key is unknown.
    async fn get_signer(&self, public_key: &PublicKey) -> Option<Arc<dyn Signer>>;
}

/// Everything an account needs to prepare one message.
pub struct PrepareContext<'a> {
    pub clock: &'a Clock,
    pub keystore: &'a dyn Keystore,
    pub timeout: Duration,
}

/// A stored wallet account.
#[async_trait]
pub trait Account: Send + Sync {
    fn address(&self) -> &Address;

    async fn prepare_message(
        &self,
        params: &TransferParams,
        ctx: PrepareContext<'_>,
    ) -> RuntimeResult<SignedMessage>;
}

#[async_trait]
pub trait AccountsStorage: Send + Sync {
    /// `None` if the account is unknown.
    async fn get_account(&self, address: &Address) -> Option<Arc<dyn Account>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::Execution("no code".to_string());
        assert_eq!(err.to_string(), "Execution failed: no code");

        let err = RuntimeError::SignerNotFound("abcd".to_string());
        assert!(err.to_string().contains("abcd"));
    }

    #[test]
    fn test_function_call_defaults_params() {
        let call: FunctionCall =
            serde_json::from_str(r#"{"abi":"{}","method":"transfer"}"#).unwrap();
        assert_eq!(call.method, "transfer");
        assert!(call.params.is_null());
    }
}
