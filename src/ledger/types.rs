//! Ledger data model shared by transports, subscriptions and delivery.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Repacked account address in its canonical textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap an already repacked address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex-encoded 256-bit hash of a message or transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash256(String);

impl Hash256 {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger-assigned transaction identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionId {
    /// Logical time of the transaction on its account.
    pub lt: u64,
    pub hash: Hash256,
}

/// A message as seen inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub hash: Hash256,
    #[serde(default)]
    pub src: Option<Address>,
    #[serde(default)]
    pub dst: Option<Address>,
    /// Attached value in nano units, as a decimal string on the wire.
    #[serde(with = "amount_string", default)]
    pub value: u128,
    #[serde(default)]
    pub bounce: bool,
    #[serde(default)]
    pub bounced: bool,
    /// Base64-encoded body, if any.
    #[serde(default)]
    pub body: Option<String>,
}

/// An observed transaction. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(default)]
    pub prev_transaction_id: Option<TransactionId>,
    pub created_at: u32,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub in_message: Option<Message>,
    #[serde(default)]
    pub out_messages: Vec<Message>,
}

impl Transaction {
    /// Hash of the inbound message, used to correlate sends with confirmations.
    pub fn in_message_hash(&self) -> Option<&Hash256> {
        self.in_message.as_ref().map(|msg| &msg.hash)
    }
}

/// Generation timings of an account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenTimings {
    pub gen_lt: u64,
    /// Ledger time (unix seconds) at which the state was produced.
    pub gen_utime: u32,
}

/// Lightweight view of an account, forwarded with state notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractState {
    #[serde(with = "amount_string", default)]
    pub balance: u128,
    pub gen_timings: GenTimings,
    #[serde(default)]
    pub last_transaction_id: Option<TransactionId>,
    pub is_deployed: bool,
    #[serde(default)]
    pub code_hash: Option<Hash256>,
}

/// Full account state, as needed for local execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullContractState {
    #[serde(flatten)]
    pub state: ContractState,
    /// Base64-encoded serialized account.
    pub boc: String,
}

/// Bounds of a batch of transactions delivered by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsBatchInfo {
    pub min_lt: u64,
    pub max_lt: u64,
}

impl TransactionsBatchInfo {
    pub fn of(transactions: &[Transaction]) -> Option<Self> {
        let min_lt = transactions.iter().map(|tx| tx.id.lt).min()?;
        let max_lt = transactions.iter().map(|tx| tx.id.lt).max()?;
        Some(Self { min_lt, max_lt })
    }
}

/// Network identity reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub network_id: i32,
    #[serde(default)]
    pub description: Option<String>,
}

/// A fully assembled, signed outbound message ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessage {
    pub hash: Hash256,
    /// Unix seconds after which the ledger rejects the message.
    pub expire_at: u32,
    /// Base64-encoded message.
    pub boc: String,
}

/// Serialize `u128` amounts as decimal strings.
pub(crate) mod amount_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(lt: u64) -> Transaction {
        Transaction {
            id: TransactionId {
                lt,
                hash: Hash256::new(format!("{:064x}", lt)),
            },
            prev_transaction_id: None,
            created_at: 1_700_000_000,
            aborted: false,
            exit_code: None,
            in_message: None,
            out_messages: Vec::new(),
        }
    }

    #[test]
    fn test_hash_is_lowercased() {
        let hash = Hash256::new("ABCDEF");
        assert_eq!(hash.as_str(), "abcdef");
    }

    #[test]
    fn test_batch_info_bounds() {
        assert!(TransactionsBatchInfo::of(&[]).is_none());

        let info = TransactionsBatchInfo::of(&[tx(30), tx(10), tx(20)]).unwrap();
        assert_eq!(info.min_lt, 10);
        assert_eq!(info.max_lt, 30);
    }

    #[test]
    fn test_amount_serialized_as_string() {
        let state = ContractState {
            balance: 1_000_000_000_000,
            gen_timings: GenTimings::default(),
            last_transaction_id: None,
            is_deployed: true,
            code_hash: None,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["balance"], "1000000000000");
        assert_eq!(json["isDeployed"], true);
    }
}
