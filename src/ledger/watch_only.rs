//! Collaborators for sessions that only observe the ledger.
//!
//! Addresses are normalized textually (`workchain:hex`); anything that needs
//! ABI encoding, keys or the VM is reported as unavailable.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::clock::Clock;
use crate::ledger::runtime::{
    Account, AccountsStorage, DecodedOutput, ExternalMessageRequest, FunctionCall, Keystore,
    LedgerRuntime, PublicKey, RuntimeError, RuntimeResult, Signer, UnsignedMessage,
};
use crate::ledger::types::{Address, FullContractState, SignedMessage, Transaction};

const UNAVAILABLE: &str = "not available in watch-only mode";

/// Runtime without ABI or VM support.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOnlyRuntime;

impl LedgerRuntime for WatchOnlyRuntime {
    fn repack_address(&self, address: &str) -> RuntimeResult<Address> {
        let invalid = || RuntimeError::InvalidAddress(address.to_string());

        let (workchain, account) = address.trim().split_once(':').ok_or_else(invalid)?;
        let workchain: i8 = workchain.parse().map_err(|_| invalid())?;
        if account.len() != 64 || !account.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        Ok(Address::new(format!(
            "{}:{}",
            workchain,
            account.to_ascii_lowercase()
        )))
    }

    fn create_external_message(
        &self,
        _clock: &Clock,
        _request: &ExternalMessageRequest,
        _timeout: Duration,
    ) -> RuntimeResult<Box<dyn UnsignedMessage>> {
        Err(RuntimeError::Encode(UNAVAILABLE.to_string()))
    }

    fn decode_transaction(
        &self,
        _transaction: &Transaction,
        _call: &FunctionCall,
    ) -> RuntimeResult<Option<DecodedOutput>> {
        Ok(None)
    }

    fn run_local(
        &self,
        _clock: &Clock,
        _state: Option<&FullContractState>,
        _message: &SignedMessage,
    ) -> RuntimeResult<Transaction> {
        Err(RuntimeError::Execution(UNAVAILABLE.to_string()))
    }
}

/// Keystore and account storage with no entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeys;

#[async_trait]
impl Keystore for NoKeys {
    async fn get_signer(&self, _public_key: &PublicKey) -> Option<Arc<dyn Signer>> {
        None
    }
}

#[async_trait]
impl AccountsStorage for NoKeys {
    async fn get_account(&self, _address: &Address) -> Option<Arc<dyn Account>> {
        None
    }
}
