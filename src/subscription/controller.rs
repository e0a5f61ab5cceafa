//! Reference-counted subscriptions and confirmed message sending.
//!
//! # Responsibilities
//! - Keep one transport subscription per address while anyone needs it
//! - Correlate incoming transactions with pending sends by message hash
//! - Forward accepted updates to the session, filtered by requested kinds
//! - Execute messages locally against the current account state

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::SubscriptionConfig;
use crate::connection::{ActiveConnection, ConnectionController};
use crate::delivery::DeliveryChannel;
use crate::error::{ClientError, ClientResult};
use crate::ledger::{Address, Clock, LedgerRuntime, RuntimeError, SignedMessage, Transaction};
use crate::observability::metrics;
use crate::provider::events::{EventSender, ProviderEvent};
use crate::subscription::pending::{PendingMessages, Resolution};
use crate::subscription::state::{ContractSubscriptionState, SubscriptionState, UpdateKinds};
use crate::transport::{TransportEvent, TransportStream};

/// Serialization point for one address.
///
/// A retired slot has been removed from the map; callers that raced with the
/// removal look the address up again.
#[derive(Default)]
struct Slot {
    retired: bool,
    live: Option<LiveSubscription>,
}

/// A transport subscription and the task consuming it.
struct LiveSubscription {
    state: Arc<Mutex<SubscriptionState>>,
    /// Connection the stream was opened on.
    connection: Arc<ActiveConnection>,
    stop: oneshot::Sender<()>,
    driver: JoinHandle<()>,
}

impl LiveSubscription {
    /// True while the stream is open on `connection`.
    fn is_bound_to(&self, connection: &Arc<ActiveConnection>) -> bool {
        Arc::ptr_eq(&self.connection, connection) && !self.driver.is_finished()
    }

    /// Stop the driver and wait until the transport stream is dropped.
    async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.driver.await {
            tracing::warn!(error = %e, "Subscription driver ended abnormally");
        }
    }
}

pub struct SubscriptionController {
    connection: Arc<ConnectionController>,
    runtime: Arc<dyn LedgerRuntime>,
    clock: Arc<Clock>,
    slots: DashMap<Address, Arc<AsyncMutex<Slot>>>,
    pending: Arc<PendingMessages>,
    events: EventSender,
    expiry_grace: Duration,
}

impl SubscriptionController {
    pub fn new(
        connection: Arc<ConnectionController>,
        runtime: Arc<dyn LedgerRuntime>,
        clock: Arc<Clock>,
        config: &SubscriptionConfig,
        events: EventSender,
    ) -> Self {
        Self {
            connection,
            runtime,
            clock,
            slots: DashMap::new(),
            pending: Arc::new(PendingMessages::new(
                config.expiry_grace_secs.min(u32::MAX as u64) as u32,
            )),
            events,
            expiry_grace: Duration::from_secs(config.expiry_grace_secs),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionController> {
        &self.connection
    }

    /// Add a subscriber for `address`, opening the transport subscription
    /// for the first one.
    pub async fn subscribe_to_contract(
        &self,
        address: &Address,
        kinds: UpdateKinds,
    ) -> ClientResult<ContractSubscriptionState> {
        let (_, snapshot) = self.acquire(address, kinds).await?;
        Ok(snapshot)
    }

    /// Drop a subscriber. The last one tears the transport subscription down.
    ///
    /// Unknown addresses are ignored.
    pub async fn unsubscribe_from_contract(&self, address: &Address) {
        let Some(slot) = self.slots.get(address).map(|s| s.clone()) else {
            return;
        };
        self.release(address, &slot).await;
    }

    /// Take one reference on the subscription for `address`.
    ///
    /// Returns the slot holding the reference, so it can be released later
    /// without touching a slot created after this one was torn down.
    async fn acquire(
        &self,
        address: &Address,
        kinds: UpdateKinds,
    ) -> ClientResult<(Arc<AsyncMutex<Slot>>, ContractSubscriptionState)> {
        loop {
            let slot = self.slots.entry(address.clone()).or_default().clone();
            let mut guard = slot.lock().await;
            if guard.retired {
                continue;
            }

            if guard.live.is_some() {
                match self.connection.with_connection(|c| async move { c }).await {
                    Ok(current) => self.rebind_if_stale(address, &mut guard, &current).await,
                    Err(e) => {
                        tracing::warn!(address = %address, error = %e, "Keeping subscription on its last connection");
                    }
                }
            }

            if let Some(live) = &guard.live {
                let mut state = lock_state(&live.state);
                state.retain(kinds);
                tracing::debug!(address = %address, ref_count = state.ref_count(), "Subscriber added");
                let snapshot = state.snapshot();
                drop(state);
                drop(guard);
                return Ok((slot, snapshot));
            }

            let state = Arc::new(Mutex::new(SubscriptionState::new(address.clone(), kinds)));
            return match self.establish(address, state).await {
                Ok(live) => {
                    let snapshot = lock_state(&live.state).snapshot();
                    tracing::info!(address = %address, endpoint = %live.connection.endpoint, "Subscribed to contract");
                    guard.live = Some(live);
                    drop(guard);
                    metrics::record_active_subscriptions(self.slots.len());
                    Ok((slot, snapshot))
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Failed to subscribe to contract");
                    guard.retired = true;
                    drop(guard);
                    self.slots.remove_if(address, |_, s| Arc::ptr_eq(s, &slot));
                    Err(e)
                }
            };
        }
    }

    /// Give back a reference taken by [`acquire`](Self::acquire).
    ///
    /// A retired slot was already torn down, so there is nothing to release.
    async fn release(&self, address: &Address, slot: &Arc<AsyncMutex<Slot>>) {
        let mut guard = slot.lock().await;
        if guard.retired {
            return;
        }

        let remaining = match &guard.live {
            Some(live) => lock_state(&live.state).release(),
            None => 0,
        };
        if remaining > 0 {
            tracing::debug!(address = %address, ref_count = remaining, "Subscriber removed");
            return;
        }

        if let Some(live) = guard.live.take() {
            live.shutdown().await;
        }
        guard.retired = true;
        drop(guard);
        self.slots.remove_if(address, |_, s| Arc::ptr_eq(s, slot));

        tracing::info!(address = %address, "Unsubscribed from contract");
        metrics::record_active_subscriptions(self.slots.len());
    }

    /// Reopen the subscription in `slot` on the current connection.
    ///
    /// Subscribers and filtering state carry over. On failure the old stream
    /// is kept.
    async fn rebind(&self, address: &Address, slot: &mut Slot) -> ClientResult<()> {
        let Some(state) = slot.live.as_ref().map(|live| live.state.clone()) else {
            return Ok(());
        };

        let fresh = self.establish(address, state).await?;
        tracing::info!(address = %address, endpoint = %fresh.connection.endpoint, "Subscription moved to the active connection");
        if let Some(stale) = slot.live.replace(fresh) {
            stale.shutdown().await;
        }
        Ok(())
    }

    /// Move the subscription in `slot` onto `connection` if it is bound
    /// elsewhere or its stream has ended.
    async fn rebind_if_stale(
        &self,
        address: &Address,
        slot: &mut Slot,
        connection: &Arc<ActiveConnection>,
    ) {
        let stale = slot
            .live
            .as_ref()
            .is_some_and(|live| !live.is_bound_to(connection));
        if !stale {
            return;
        }
        if let Err(e) = self.rebind(address, slot).await {
            tracing::warn!(address = %address, error = %e, "Failed to move subscription to the active connection");
        }
    }

    /// Tear down every subscription regardless of its reference count.
    ///
    /// Pending sends keep waiting on their own expiry timers.
    pub async fn unsubscribe_from_all_contracts(&self) {
        let slots: Vec<(Address, Arc<AsyncMutex<Slot>>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut removed = 0usize;
        for (address, slot) in slots {
            let mut guard = slot.lock().await;
            if guard.retired {
                continue;
            }
            if let Some(live) = guard.live.take() {
                live.shutdown().await;
            }
            guard.retired = true;
            self.slots.remove_if(&address, |_, s| Arc::ptr_eq(s, &slot));
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(count = removed, "Unsubscribed from all contracts");
        }
        metrics::record_active_subscriptions(self.slots.len());
    }

    /// Snapshot of the subscription for `address`, if one is live.
    pub async fn subscription(&self, address: &Address) -> Option<ContractSubscriptionState> {
        let slot = self.slots.get(address).map(|s| s.clone())?;
        let guard = slot.lock().await;
        guard.live.as_ref().map(|live| lock_state(&live.state).snapshot())
    }

    /// Snapshots of every live subscription, ordered by address.
    pub async fn subscriptions(&self) -> Vec<ContractSubscriptionState> {
        let slots: Vec<Arc<AsyncMutex<Slot>>> =
            self.slots.iter().map(|entry| entry.value().clone()).collect();

        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            let guard = slot.lock().await;
            if let Some(live) = &guard.live {
                snapshots.push(lock_state(&live.state).snapshot());
            }
        }
        snapshots.sort_by(|a, b| a.address.cmp(&b.address));
        snapshots
    }

    /// Broadcast `message` and wait for the transaction it produces.
    ///
    /// Resolves `None` once the message is known to have expired.
    pub async fn send_message(&self, address: &Address, message: &SignedMessage) -> Option<Transaction> {
        let resolution = self.pending.register(address, message);

        let slot = match self.acquire(address, UpdateKinds::NONE).await {
            Ok((slot, _)) => slot,
            Err(e) => {
                tracing::warn!(address = %address, hash = %message.hash, error = %e, "Cannot watch for confirmation");
                self.pending.take(address, &message.hash);
                return None;
            }
        };

        let broadcast = self
            .connection
            .with_connection(|connection| {
                let message = message.clone();
                async move {
                    let result = connection.transport.send_message(&message).await;
                    (connection, result)
                }
            })
            .await;

        match broadcast {
            Ok((connection, result)) => {
                match result {
                    Ok(()) => {
                        tracing::debug!(address = %address, hash = %message.hash, expire_at = message.expire_at, "Message broadcast");
                    }
                    // The message may still have reached the network, so the
                    // attempt only ends at expiry.
                    Err(e) => {
                        tracing::warn!(address = %address, hash = %message.hash, error = %e, "Broadcast failed");
                    }
                }
                // Reselected between subscribing and broadcasting
                let mut guard = slot.lock().await;
                if !guard.retired {
                    self.rebind_if_stale(address, &mut guard, &connection).await;
                }
            }
            Err(e) => {
                tracing::warn!(address = %address, hash = %message.hash, error = %e, "Broadcast failed");
            }
        }

        let transaction = self.wait_for_resolution(address, message, resolution).await;
        self.release(address, &slot).await;
        transaction
    }

    async fn wait_for_resolution(
        &self,
        address: &Address,
        message: &SignedMessage,
        mut resolution: Resolution,
    ) -> Option<Transaction> {
        let deadline_ms = u64::from(message.expire_at) * 1000 + self.expiry_grace.as_millis() as u64;
        let remaining = Duration::from_millis(deadline_ms.saturating_sub(self.clock.now_ms()));

        tokio::select! {
            result = &mut resolution => result.unwrap_or(None),
            _ = sleep(remaining) => match self.pending.take(address, &message.hash) {
                Some(_) => {
                    tracing::debug!(address = %address, hash = %message.hash, "Message expired");
                    None
                }
                // Resolved concurrently with the timer
                None => resolution.await.unwrap_or(None),
            },
        }
    }

    /// Execute `message` against the current state of `address` without
    /// broadcasting it.
    pub async fn send_message_locally(
        &self,
        address: &Address,
        message: &SignedMessage,
    ) -> ClientResult<Transaction> {
        let state = self
            .connection
            .with_transport(|transport| {
                let address = address.clone();
                async move { transport.get_full_contract_state(&address).await }
            })
            .await?
            .map_err(|e| ClientError::Execution(format!("account state unavailable: {}", e)))?;

        let transaction = self
            .runtime
            .run_local(&self.clock, state.as_ref(), message)
            .map_err(|e| match e {
                RuntimeError::Execution(reason) => ClientError::Execution(reason),
                other => ClientError::Execution(other.to_string()),
            })?;

        tracing::debug!(
            address = %address,
            hash = %message.hash,
            exit_code = ?transaction.exit_code,
            aborted = transaction.aborted,
            "Message executed locally"
        );
        Ok(transaction)
    }

    async fn establish(
        &self,
        address: &Address,
        state: Arc<Mutex<SubscriptionState>>,
    ) -> ClientResult<LiveSubscription> {
        let (connection, stream) = self
            .connection
            .with_connection(|connection| {
                let address = address.clone();
                async move {
                    let stream = connection.transport.subscribe(&address).await;
                    (connection, stream)
                }
            })
            .await?;
        let stream = stream?;

        let (stop, stop_rx) = oneshot::channel();
        let driver = tokio::spawn(drive_subscription(
            stream,
            state.clone(),
            self.pending.clone(),
            self.events.clone(),
            stop_rx,
        ));

        Ok(LiveSubscription {
            state,
            connection,
            stop,
            driver,
        })
    }
}

impl std::fmt::Debug for SubscriptionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("subscriptions", &self.slots.len())
            .field("expiry_grace", &self.expiry_grace)
            .finish()
    }
}

#[async_trait]
impl DeliveryChannel for SubscriptionController {
    async fn send_message(&self, address: &Address, message: &SignedMessage) -> Option<Transaction> {
        SubscriptionController::send_message(self, address, message).await
    }

    async fn send_message_locally(
        &self,
        address: &Address,
        message: &SignedMessage,
    ) -> ClientResult<Transaction> {
        SubscriptionController::send_message_locally(self, address, message).await
    }
}

fn lock_state(state: &Mutex<SubscriptionState>) -> MutexGuard<'_, SubscriptionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn drive_subscription(
    mut stream: TransportStream,
    state: Arc<Mutex<SubscriptionState>>,
    pending: Arc<PendingMessages>,
    events: EventSender,
    mut stop: oneshot::Receiver<()>,
) {
    let address = lock_state(&state).address().clone();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = stream.next() => match event {
                Some(event) => apply_event(&address, event, &state, &pending, &events),
                None => {
                    tracing::warn!(address = %address, "Transport closed the subscription stream");
                    break;
                }
            },
        }
    }

    tracing::debug!(address = %address, "Subscription driver stopped");
}

/// Apply one transport update: resolve pending sends, then forward.
fn apply_event(
    address: &Address,
    event: TransportEvent,
    state: &Mutex<SubscriptionState>,
    pending: &PendingMessages,
    events: &EventSender,
) {
    match event {
        TransportEvent::TransactionsFound { transactions, .. } => {
            let (accepted, kinds) = {
                let mut state = lock_state(state);
                (state.accept_transactions(transactions), state.kinds())
            };
            let Some(info) = crate::ledger::TransactionsBatchInfo::of(&accepted) else {
                return;
            };

            for transaction in &accepted {
                pending.confirm(address, transaction);
            }

            if kinds.transactions {
                let _ = events.send(ProviderEvent::TransactionsFound {
                    address: address.clone(),
                    transactions: accepted,
                    info,
                });
            }
        }
        TransportEvent::StateChanged(contract) => {
            pending.expire_before(address, contract.gen_timings.gen_utime);

            let (changed, kinds) = {
                let mut state = lock_state(state);
                (state.accept_state(contract.clone()), state.kinds())
            };
            if changed && kinds.state {
                let _ = events.send(ProviderEvent::ContractStateChanged {
                    address: address.clone(),
                    state: contract,
                });
            }
        }
    }
}
