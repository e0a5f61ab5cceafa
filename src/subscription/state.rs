//! Per-address subscription state.
//!
//! # Responsibilities
//! - Hold the reference count and requested update kinds
//! - Drop stale or duplicate transactions by logical time
//! - Produce snapshots for callers

use serde::{Deserialize, Serialize};

use crate::ledger::{Address, ContractState, Transaction};

/// Which updates a subscriber wants forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateKinds {
    #[serde(default)]
    pub state: bool,
    #[serde(default)]
    pub transactions: bool,
}

impl UpdateKinds {
    /// Internal subscriptions that forward nothing.
    pub const NONE: Self = Self {
        state: false,
        transactions: false,
    };

    pub const ALL: Self = Self {
        state: true,
        transactions: true,
    };

    pub fn merge(&mut self, other: UpdateKinds) {
        self.state |= other.state;
        self.transactions |= other.transactions;
    }
}

/// Snapshot returned to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSubscriptionState {
    pub address: Address,
    pub kinds: UpdateKinds,
    /// Logical time of the last accepted transaction.
    pub last_lt: Option<u64>,
    pub ref_count: usize,
    pub state: Option<ContractState>,
}

/// Mutable state of one live subscription.
#[derive(Debug)]
pub struct SubscriptionState {
    address: Address,
    ref_count: usize,
    kinds: UpdateKinds,
    last_lt: Option<u64>,
    contract: Option<ContractState>,
}

impl SubscriptionState {
    /// State for a freshly established subscription with one subscriber.
    pub fn new(address: Address, kinds: UpdateKinds) -> Self {
        Self {
            address,
            ref_count: 1,
            kinds,
            last_lt: None,
            contract: None,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn kinds(&self) -> UpdateKinds {
        self.kinds
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn last_lt(&self) -> Option<u64> {
        self.last_lt
    }

    /// Register one more subscriber.
    pub fn retain(&mut self, kinds: UpdateKinds) {
        self.ref_count += 1;
        self.kinds.merge(kinds);
    }

    /// Drop one subscriber. Returns the remaining count.
    pub fn release(&mut self) -> usize {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    /// Apply a batch in ascending lt order, keeping only transactions newer
    /// than the last accepted one.
    pub fn accept_transactions(&mut self, mut transactions: Vec<Transaction>) -> Vec<Transaction> {
        transactions.sort_by_key(|tx| tx.id.lt);

        let mut accepted = Vec::with_capacity(transactions.len());
        for tx in transactions {
            if self.last_lt.is_some_and(|last| tx.id.lt <= last) {
                continue;
            }
            self.last_lt = Some(tx.id.lt);
            accepted.push(tx);
        }
        accepted
    }

    /// Record the latest account state.
    ///
    /// Returns true when anything but the generation timings changed.
    pub fn accept_state(&mut self, state: ContractState) -> bool {
        let changed = match &self.contract {
            Some(previous) => {
                previous.balance != state.balance
                    || previous.last_transaction_id != state.last_transaction_id
                    || previous.is_deployed != state.is_deployed
                    || previous.code_hash != state.code_hash
            }
            None => true,
        };
        self.contract = Some(state);
        changed
    }

    pub fn snapshot(&self) -> ContractSubscriptionState {
        ContractSubscriptionState {
            address: self.address.clone(),
            kinds: self.kinds,
            last_lt: self.last_lt,
            ref_count: self.ref_count,
            state: self.contract.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{GenTimings, Hash256, TransactionId};

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

    fn contract(balance: u128, gen_utime: u32) -> ContractState {
        ContractState {
            balance,
            gen_timings: GenTimings {
                gen_lt: 0,
                gen_utime,
            },
            last_transaction_id: None,
            is_deployed: true,
            code_hash: None,
        }
    }

    fn lts(transactions: &[Transaction]) -> Vec<u64> {
        transactions.iter().map(|tx| tx.id.lt).collect()
    }

    #[test]
    fn test_ref_counting() {
        let mut state = SubscriptionState::new(Address::new("0:aa"), UpdateKinds::NONE);
        assert_eq!(state.ref_count(), 1);

        state.retain(UpdateKinds {
            state: true,
            transactions: false,
        });
        assert_eq!(state.ref_count(), 2);
        assert!(state.kinds().state);
        assert!(!state.kinds().transactions);

        assert_eq!(state.release(), 1);
        assert_eq!(state.release(), 0);
        assert_eq!(state.release(), 0);
    }

    #[test]
    fn test_batch_sorted_and_lt_monotonic() {
        let mut state = SubscriptionState::new(Address::new("0:aa"), UpdateKinds::ALL);

        let accepted = state.accept_transactions(vec![tx(30), tx(10), tx(20)]);
        assert_eq!(lts(&accepted), vec![10, 20, 30]);
        assert_eq!(state.last_lt(), Some(30));

        // Duplicates and older transactions are dropped
        let accepted = state.accept_transactions(vec![tx(30), tx(25), tx(40)]);
        assert_eq!(lts(&accepted), vec![40]);
        assert_eq!(state.last_lt(), Some(40));

        assert!(state.accept_transactions(vec![tx(40)]).is_empty());
    }

    #[test]
    fn test_state_change_ignores_gen_timings() {
        let mut state = SubscriptionState::new(Address::new("0:aa"), UpdateKinds::ALL);

        assert!(state.accept_state(contract(100, 1)));
        assert!(!state.accept_state(contract(100, 2)));
        assert!(state.accept_state(contract(90, 3)));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.state.unwrap().gen_timings.gen_utime, 3);
    }
}
