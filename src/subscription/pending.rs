//! Registry of messages awaiting on-chain confirmation.
//!
//! # Responsibilities
//! - Track outstanding sends per address, keyed by message hash
//! - Resolve each entry exactly once, by confirmation or by expiry
//!
//! # Design Decisions
//! - Every removal happens under the address shard lock, so the path that
//!   removes an entry is the only one that resolves it
//! - Matching is by inbound message hash, never by arrival order

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

use crate::ledger::{Address, Hash256, SignedMessage, Transaction};

/// Receives the outcome of one send: the transaction, or `None` on expiry.
pub type Resolution = oneshot::Receiver<Option<Transaction>>;

/// One outstanding send.
#[derive(Debug)]
pub struct PendingMessage {
    pub expire_at: u32,
    /// Submission order across the whole registry.
    pub order: u64,
    resolver: oneshot::Sender<Option<Transaction>>,
}

impl PendingMessage {
    fn resolve(self, transaction: Option<Transaction>) {
        // The waiter may already be gone
        let _ = self.resolver.send(transaction);
    }
}

#[derive(Debug)]
pub struct PendingMessages {
    entries: DashMap<Address, HashMap<Hash256, PendingMessage>>,
    next_order: AtomicU64,
    /// Allowed lateness of a confirmation past `expire_at`, in seconds.
    grace_secs: u32,
}

impl PendingMessages {
    pub fn new(grace_secs: u32) -> Self {
        Self {
            entries: DashMap::new(),
            next_order: AtomicU64::new(0),
            grace_secs,
        }
    }

    /// Track `message` as sent to `address`.
    ///
    /// Registering the same hash twice replaces the earlier entry; its waiter
    /// then observes no confirmation.
    pub fn register(&self, address: &Address, message: &SignedMessage) -> Resolution {
        let (resolver, receiver) = oneshot::channel();
        let entry = PendingMessage {
            expire_at: message.expire_at,
            order: self.next_order.fetch_add(1, Ordering::Relaxed),
            resolver,
        };

        let replaced = self
            .entries
            .entry(address.clone())
            .or_default()
            .insert(message.hash.clone(), entry);

        if let Some(previous) = replaced {
            tracing::warn!(
                address = %address,
                hash = %message.hash,
                "Message registered twice, dropping earlier waiter"
            );
            previous.resolve(None);
        }

        receiver
    }

    /// Resolve the entry matching `transaction`'s inbound message.
    ///
    /// Returns true when a waiter was resolved.
    pub fn confirm(&self, address: &Address, transaction: &Transaction) -> bool {
        let Some(hash) = transaction.in_message_hash() else {
            return false;
        };

        let entry = {
            let Some(mut messages) = self.entries.get_mut(address) else {
                return false;
            };
            let Some(pending) = messages.get(hash) else {
                return false;
            };

            let deadline = pending.expire_at.saturating_add(self.grace_secs);
            if transaction.created_at > deadline {
                tracing::warn!(
                    address = %address,
                    hash = %hash,
                    created_at = transaction.created_at,
                    expire_at = pending.expire_at,
                    "Ignoring confirmation past message expiration"
                );
                return false;
            }
            messages.remove(hash)
        };
        self.prune(address);

        match entry {
            Some(entry) => {
                tracing::debug!(address = %address, hash = %hash, lt = transaction.id.lt, "Message confirmed");
                entry.resolve(Some(transaction.clone()));
                true
            }
            None => false,
        }
    }

    /// Expire every entry of `address` whose `expire_at` precedes `gen_utime`.
    ///
    /// Returns the number of entries expired.
    pub fn expire_before(&self, address: &Address, gen_utime: u32) -> usize {
        let expired: Vec<PendingMessage> = {
            let Some(mut messages) = self.entries.get_mut(address) else {
                return 0;
            };
            let hashes: Vec<Hash256> = messages
                .iter()
                .filter(|(_, pending)| pending.expire_at < gen_utime)
                .map(|(hash, _)| hash.clone())
                .collect();
            hashes
                .iter()
                .filter_map(|hash| messages.remove(hash))
                .collect()
        };
        self.prune(address);

        let count = expired.len();
        for entry in expired {
            entry.resolve(None);
        }
        if count > 0 {
            tracing::debug!(address = %address, gen_utime, count, "Pending messages expired by ledger time");
        }
        count
    }

    /// Remove an entry without resolving it.
    ///
    /// Returns `None` if another path already resolved it.
    pub fn take(&self, address: &Address, hash: &Hash256) -> Option<PendingMessage> {
        let entry = self
            .entries
            .get_mut(address)
            .and_then(|mut messages| messages.remove(hash));
        self.prune(address);
        entry
    }

    /// Number of outstanding sends for `address`.
    pub fn len(&self, address: &Address) -> usize {
        self.entries.get(address).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| entry.value().is_empty())
    }

    fn prune(&self, address: &Address) {
        self.entries.remove_if(address, |_, messages| messages.is_empty());
    }
}
