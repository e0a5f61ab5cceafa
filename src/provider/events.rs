//! Events emitted to the session's consumer.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::ledger::{Address, ContractState, Hash256, Transaction, TransactionsBatchInfo};
use crate::observability::metrics;

/// Notification pushed to the session's event sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ProviderEvent {
    /// Outcome of a delayed send.
    MessageStatusUpdated {
        address: Address,
        hash: Hash256,
        transaction: Option<Transaction>,
    },
    ContractStateChanged {
        address: Address,
        state: ContractState,
    },
    TransactionsFound {
        address: Address,
        transactions: Vec<Transaction>,
        info: TransactionsBatchInfo,
    },
    NetworkChanged {
        selected_connection: String,
        network_id: i32,
    },
}

impl ProviderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderEvent::MessageStatusUpdated { .. } => "messageStatusUpdated",
            ProviderEvent::ContractStateChanged { .. } => "contractStateChanged",
            ProviderEvent::TransactionsFound { .. } => "transactionsFound",
            ProviderEvent::NetworkChanged { .. } => "networkChanged",
        }
    }
}

/// Events buffered for the consumer before they are dropped.
pub const EVENT_BUFFER: usize = 1024;

/// Bounded channel the controllers publish events into.
///
/// Publishing never waits: when the consumer falls behind by a full buffer
/// the event is dropped and logged.
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::Sender<ProviderEvent>);

impl EventSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProviderEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self(tx), rx)
    }

    /// Returns false if the event was not queued.
    pub fn send(&self, event: ProviderEvent) -> bool {
        match self.0.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    event = event.name(),
                    capacity = self.0.max_capacity(),
                    "Event buffer full, dropping event"
                );
                metrics::record_event_dropped(event.name());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Consumer of session events.
pub trait EventSink: Send + Sync + 'static {
    /// Deliver one event. Returns false once the consumer is gone.
    fn emit(&self, event: ProviderEvent) -> bool;
}

impl EventSink for mpsc::UnboundedSender<ProviderEvent> {
    fn emit(&self, event: ProviderEvent) -> bool {
        self.send(event).is_ok()
    }
}

impl EventSink for broadcast::Sender<ProviderEvent> {
    fn emit(&self, event: ProviderEvent) -> bool {
        // No receivers right now is not fatal for a broadcast sink
        let _ = self.send(event);
        true
    }
}
