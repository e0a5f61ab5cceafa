//! Provider request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::{
    Address, DecodedOutput, FullContractState, FunctionCall, Hash256, PublicKey, Transaction,
    TransactionId, TransactionsBatchInfo,
};
use crate::subscription::{ContractSubscriptionState, UpdateKinds};

/// Every request the session accepts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ProviderRequest {
    Subscribe {
        address: String,
        #[serde(default)]
        subscriptions: UpdateKinds,
    },
    Unsubscribe {
        address: String,
    },
    UnsubscribeAll,
    GetProviderState,
    ChangeNetwork {
        network: String,
    },
    GetFullContractState {
        address: String,
    },
    GetTransactions {
        address: String,
        #[serde(default)]
        continuation: Option<TransactionId>,
        #[serde(default)]
        limit: Option<u8>,
    },
    GetTransaction {
        hash: String,
    },
    GetAccountsByCodeHash {
        code_hash: String,
        #[serde(default)]
        limit: Option<u8>,
        #[serde(default)]
        continuation: Option<String>,
    },
    SendMessage(SendMessageParams),
    SendMessageDelayed(SendMessageParams),
    SendExternalMessage(SendExternalMessageParams),
    SendExternalMessageDelayed(SendExternalMessageParams),
    SendUnsignedExternalMessage(SendUnsignedExternalMessageParams),
}

impl ProviderRequest {
    /// Wire name of the request.
    pub fn method(&self) -> &'static str {
        match self {
            ProviderRequest::Subscribe { .. } => "subscribe",
            ProviderRequest::Unsubscribe { .. } => "unsubscribe",
            ProviderRequest::UnsubscribeAll => "unsubscribeAll",
            ProviderRequest::GetProviderState => "getProviderState",
            ProviderRequest::ChangeNetwork { .. } => "changeNetwork",
            ProviderRequest::GetFullContractState { .. } => "getFullContractState",
            ProviderRequest::GetTransactions { .. } => "getTransactions",
            ProviderRequest::GetTransaction { .. } => "getTransaction",
            ProviderRequest::GetAccountsByCodeHash { .. } => "getAccountsByCodeHash",
            ProviderRequest::SendMessage(_) => "sendMessage",
            ProviderRequest::SendMessageDelayed(_) => "sendMessageDelayed",
            ProviderRequest::SendExternalMessage(_) => "sendExternalMessage",
            ProviderRequest::SendExternalMessageDelayed(_) => "sendExternalMessageDelayed",
            ProviderRequest::SendUnsignedExternalMessage(_) => "sendUnsignedExternalMessage",
        }
    }
}

/// Transfer from a stored account.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    pub sender: String,
    pub recipient: String,
    /// Nano units as a decimal string.
    pub amount: String,
    #[serde(default)]
    pub bounce: bool,
    #[serde(default)]
    pub payload: Option<FunctionCall>,
    #[serde(default)]
    pub local: bool,
}

/// External message signed with a keystore key.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendExternalMessageParams {
    pub public_key: PublicKey,
    pub recipient: String,
    #[serde(default)]
    pub state_init: Option<String>,
    pub payload: FunctionCall,
    #[serde(default)]
    pub local: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendUnsignedExternalMessageParams {
    pub recipient: String,
    #[serde(default)]
    pub state_init: Option<String>,
    pub payload: FunctionCall,
    #[serde(default)]
    pub local: bool,
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ProviderResponse {
    Empty,
    Subscription(ContractSubscriptionState),
    ProviderState(ProviderState),
    Network(NetworkSelection),
    FullContractState {
        state: Option<FullContractState>,
    },
    Transactions {
        transactions: Vec<Transaction>,
        continuation: Option<TransactionId>,
        info: Option<TransactionsBatchInfo>,
    },
    Transaction {
        transaction: Option<Transaction>,
    },
    Accounts {
        accounts: Vec<Address>,
        continuation: Option<Address>,
    },
    Sent {
        transaction: Transaction,
        output: Option<DecodedOutput>,
    },
    Delayed {
        message: DelayedMessage,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderState {
    pub session_id: Uuid,
    pub selected_connection: String,
    /// `None` until a connection is established.
    pub network_id: Option<i32>,
    pub clock_offset_ms: i64,
    pub subscriptions: Vec<ContractSubscriptionState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSelection {
    pub selected_connection: String,
    pub network_id: i32,
}

/// Message accepted for background delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedMessage {
    pub account: Address,
    pub hash: Hash256,
    pub expire_at: u32,
}
