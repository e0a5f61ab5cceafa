//! Request-level facade over the connection, subscription and delivery
//! engines.
//!
//! # Responsibilities
//! - Validate request parameters before anything touches the network
//! - Dispatch each request variant to its handler
//! - Run delayed sends in the background and report them as events
//! - Forward controller events to the attached sink

use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ClientConfig, ConnectionPreset};
use crate::connection::{ConnectionController, ConnectionError};
use crate::delivery::{
    DeliveryChannel, ExternalMessageSource, MessageSource, SendCoordinator, TransferSource,
    LOCAL_EXECUTION_TIMEOUT_SECS,
};
use crate::error::{ClientError, ClientResult};
use crate::ledger::{
    Address, AccountsStorage, Clock, DecodedOutput, ExternalMessageRequest, FunctionCall,
    Hash256, Keystore, LedgerRuntime, Transaction, TransactionsBatchInfo, TransferParams,
};
use crate::provider::error::ProviderError;
use crate::provider::events::{EventSender, EventSink, ProviderEvent, EVENT_BUFFER};
use crate::provider::request::{
    DelayedMessage, NetworkSelection, ProviderRequest, ProviderResponse, ProviderState,
    SendExternalMessageParams, SendMessageParams, SendUnsignedExternalMessageParams,
};
use crate::resilience::retries::{timeout_duration, RetryPolicy};
use crate::subscription::{SubscriptionController, UpdateKinds};
use crate::transport::TransportFactory;

/// External components the session consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn LedgerRuntime>,
    pub keystore: Arc<dyn Keystore>,
    pub accounts: Arc<dyn AccountsStorage>,
    pub clock: Arc<Clock>,
}

pub struct ProviderSession {
    id: Uuid,
    connection: Arc<ConnectionController>,
    subscriptions: Arc<SubscriptionController>,
    collaborators: Collaborators,
    presets: ArcSwap<Vec<ConnectionPreset>>,
    policy: RetryPolicy,
    page_size: u8,
    events: EventSender,
    pending_events: Mutex<Option<mpsc::Receiver<ProviderEvent>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ProviderSession {
    /// Build an inert session. Nothing connects until the first request and
    /// no event leaves it until [`attach_event_sink`](Self::attach_event_sink).
    pub fn new(
        config: &ClientConfig,
        factory: Arc<dyn TransportFactory>,
        collaborators: Collaborators,
    ) -> ClientResult<Self> {
        let preset = config
            .connection
            .selected_preset()
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownPreset(config.connection.selected.clone()))?;

        let connection = Arc::new(ConnectionController::new(
            factory,
            preset,
            std::time::Duration::from_secs(config.connection.connect_timeout_secs),
        ));

        let (events, pending_events) = EventSender::channel(EVENT_BUFFER);
        let subscriptions = Arc::new(SubscriptionController::new(
            connection.clone(),
            collaborators.runtime.clone(),
            collaborators.clock.clone(),
            &config.subscriptions,
            events.clone(),
        ));

        let id = Uuid::new_v4();
        tracing::info!(session = %id, preset = %config.connection.selected, "Provider session created");

        Ok(Self {
            id,
            connection,
            subscriptions,
            collaborators,
            presets: ArcSwap::from_pointee(config.connection.presets.clone()),
            policy: RetryPolicy::from_config(&config.message),
            page_size: config.subscriptions.history_page_size.max(1),
            events,
            pending_events: Mutex::new(Some(pending_events)),
            forwarder: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> &Arc<ConnectionController> {
        &self.connection
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionController> {
        &self.subscriptions
    }

    /// Start delivering events to `sink`, including any buffered so far.
    ///
    /// Returns false if a sink is already attached.
    pub fn attach_event_sink<S: EventSink>(&self, sink: S) -> bool {
        let receiver = self
            .pending_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut receiver) = receiver else {
            tracing::warn!(session = %self.id, "Event sink already attached");
            return false;
        };

        let session = self.id;
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                tracing::trace!(session = %session, event = event.name(), "Forwarding event");
                if !sink.emit(event) {
                    tracing::debug!(session = %session, "Event sink closed");
                    break;
                }
            }
        });
        *self
            .forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        true
    }

    /// Replace the known presets, e.g. after a config reload.
    pub fn update_presets(&self, presets: Vec<ConnectionPreset>) {
        self.presets.store(Arc::new(presets));
    }

    /// Drop every subscription and stop forwarding events.
    pub async fn close(&self) {
        self.subscriptions.unsubscribe_from_all_contracts().await;
        if let Some(handle) = self
            .forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
        tracing::info!(session = %self.id, "Provider session closed");
    }

    /// Validate and execute one request.
    pub async fn handle(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let method = request.method();
        let span = tracing::debug_span!("provider_request", session = %self.id, method);

        self.dispatch(request)
            .instrument(span)
            .await
            .map_err(|error| {
                tracing::debug!(session = %self.id, method, error = %error, "Request failed");
                ProviderError::new(method, error)
            })
    }

    async fn dispatch(&self, request: ProviderRequest) -> ClientResult<ProviderResponse> {
        match request {
            ProviderRequest::Subscribe {
                address,
                subscriptions,
            } => self.subscribe(&address, subscriptions).await,
            ProviderRequest::Unsubscribe { address } => self.unsubscribe(&address).await,
            ProviderRequest::UnsubscribeAll => {
                self.subscriptions.unsubscribe_from_all_contracts().await;
                Ok(ProviderResponse::Empty)
            }
            ProviderRequest::GetProviderState => self.get_provider_state().await,
            ProviderRequest::ChangeNetwork { network } => self.change_network(&network).await,
            ProviderRequest::GetFullContractState { address } => {
                self.get_full_contract_state(&address).await
            }
            ProviderRequest::GetTransactions {
                address,
                continuation,
                limit,
            } => {
                self.get_transactions(&address, continuation.map(|id| id.lt), limit)
                    .await
            }
            ProviderRequest::GetTransaction { hash } => self.get_transaction(&hash).await,
            ProviderRequest::GetAccountsByCodeHash {
                code_hash,
                limit,
                continuation,
            } => {
                self.get_accounts_by_code_hash(&code_hash, limit, continuation.as_deref())
                    .await
            }
            ProviderRequest::SendMessage(params) => self.send_message(params, false).await,
            ProviderRequest::SendMessageDelayed(params) => self.send_message(params, true).await,
            ProviderRequest::SendExternalMessage(params) => {
                self.send_external_message(params, false).await
            }
            ProviderRequest::SendExternalMessageDelayed(params) => {
                self.send_external_message(params, true).await
            }
            ProviderRequest::SendUnsignedExternalMessage(params) => {
                self.send_unsigned_external_message(params).await
            }
        }
    }

    async fn subscribe(&self, address: &str, kinds: UpdateKinds) -> ClientResult<ProviderResponse> {
        let address = self.repack(address)?;
        let state = self
            .subscriptions
            .subscribe_to_contract(&address, kinds)
            .await?;
        Ok(ProviderResponse::Subscription(state))
    }

    async fn unsubscribe(&self, address: &str) -> ClientResult<ProviderResponse> {
        let address = self.repack(address)?;
        self.subscriptions.unsubscribe_from_contract(&address).await;
        Ok(ProviderResponse::Empty)
    }

    /// Network, clock and subscription summary.
    pub async fn get_provider_state(&self) -> ClientResult<ProviderResponse> {
        Ok(ProviderResponse::ProviderState(ProviderState {
            session_id: self.id,
            selected_connection: self.connection.preset().group.clone(),
            network_id: self.connection.active().map(|active| active.network_id),
            clock_offset_ms: self.collaborators.clock.offset_ms(),
            subscriptions: self.subscriptions.subscriptions().await,
        }))
    }

    /// Switch to the preset named `network`.
    ///
    /// Subscriptions are dropped first and not re-established.
    pub async fn change_network(&self, network: &str) -> ClientResult<ProviderResponse> {
        let preset = self
            .presets
            .load()
            .iter()
            .find(|preset| preset.group == network)
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownPreset(network.to_string()))?;

        self.subscriptions.unsubscribe_from_all_contracts().await;
        let active = self.connection.switch_preset(preset).await?;

        let selection = NetworkSelection {
            selected_connection: active.group.clone(),
            network_id: active.network_id,
        };
        tracing::info!(
            session = %self.id,
            group = %selection.selected_connection,
            network_id = selection.network_id,
            "Network changed"
        );
        let _ = self.events.send(ProviderEvent::NetworkChanged {
            selected_connection: selection.selected_connection.clone(),
            network_id: selection.network_id,
        });
        Ok(ProviderResponse::Network(selection))
    }

    async fn get_full_contract_state(&self, address: &str) -> ClientResult<ProviderResponse> {
        let address = self.repack(address)?;
        let state = self
            .connection
            .with_transport(|transport| async move {
                transport.get_full_contract_state(&address).await
            })
            .await??;
        Ok(ProviderResponse::FullContractState { state })
    }

    async fn get_transactions(
        &self,
        address: &str,
        before_lt: Option<u64>,
        limit: Option<u8>,
    ) -> ClientResult<ProviderResponse> {
        let address = self.repack(address)?;
        let limit = self.limit(limit)?;

        let transactions = self
            .connection
            .with_transport(|transport| async move {
                transport.get_transactions(&address, before_lt, limit).await
            })
            .await??;

        let continuation = transactions
            .last()
            .and_then(|oldest| oldest.prev_transaction_id.clone());
        let info = TransactionsBatchInfo::of(&transactions);
        Ok(ProviderResponse::Transactions {
            transactions,
            continuation,
            info,
        })
    }

    async fn get_transaction(&self, hash: &str) -> ClientResult<ProviderResponse> {
        let hash = parse_hash(hash)?;
        let transaction = self
            .connection
            .with_transport(|transport| async move { transport.get_transaction(&hash).await })
            .await??;
        Ok(ProviderResponse::Transaction { transaction })
    }

    async fn get_accounts_by_code_hash(
        &self,
        code_hash: &str,
        limit: Option<u8>,
        continuation: Option<&str>,
    ) -> ClientResult<ProviderResponse> {
        let code_hash = parse_hash(code_hash)?;
        let limit = self.limit(limit)?;
        let continuation = continuation.map(|c| self.repack(c)).transpose()?;

        let accounts = self
            .connection
            .with_transport(|transport| async move {
                transport
                    .get_accounts_by_code_hash(&code_hash, limit, continuation.as_ref())
                    .await
            })
            .await??;

        let continuation = if accounts.len() >= limit as usize {
            accounts.last().cloned()
        } else {
            None
        };
        Ok(ProviderResponse::Accounts {
            accounts,
            continuation,
        })
    }

    async fn send_message(
        &self,
        params: SendMessageParams,
        delayed: bool,
    ) -> ClientResult<ProviderResponse> {
        let sender = self.repack(&params.sender)?;
        let recipient = self.repack(&params.recipient)?;
        let amount = parse_amount(&params.amount)?;

        let account = self
            .collaborators
            .accounts
            .get_account(&sender)
            .await
            .ok_or_else(|| ClientError::SignerNotFound(sender.to_string()))?;

        let source = Arc::new(TransferSource {
            account,
            keystore: self.collaborators.keystore.clone(),
            clock: self.collaborators.clock.clone(),
            params: TransferParams {
                recipient,
                amount,
                bounce: params.bounce,
                payload: params.payload.clone(),
            },
        });

        self.deliver(sender, source, params.payload, params.local, delayed)
            .await
    }

    async fn send_external_message(
        &self,
        params: SendExternalMessageParams,
        delayed: bool,
    ) -> ClientResult<ProviderResponse> {
        let recipient = self.repack(&params.recipient)?;
        let signer = self
            .collaborators
            .keystore
            .get_signer(&params.public_key)
            .await
            .ok_or_else(|| ClientError::SignerNotFound(params.public_key.to_string()))?;

        let source = Arc::new(ExternalMessageSource {
            runtime: self.collaborators.runtime.clone(),
            clock: self.collaborators.clock.clone(),
            request: ExternalMessageRequest {
                recipient: recipient.clone(),
                state_init: params.state_init,
                call: params.payload.clone(),
                public_key: Some(params.public_key),
            },
            signer: Some(signer),
        });

        self.deliver(recipient, source, Some(params.payload), params.local, delayed)
            .await
    }

    async fn send_unsigned_external_message(
        &self,
        params: SendUnsignedExternalMessageParams,
    ) -> ClientResult<ProviderResponse> {
        let recipient = self.repack(&params.recipient)?;

        let source = Arc::new(ExternalMessageSource {
            runtime: self.collaborators.runtime.clone(),
            clock: self.collaborators.clock.clone(),
            request: ExternalMessageRequest {
                recipient: recipient.clone(),
                state_init: params.state_init,
                call: params.payload.clone(),
                public_key: None,
            },
            signer: None,
        });

        self.deliver(recipient, source, Some(params.payload), params.local, false)
            .await
    }

    async fn deliver(
        &self,
        address: Address,
        source: Arc<dyn MessageSource>,
        call: Option<FunctionCall>,
        local: bool,
        delayed: bool,
    ) -> ClientResult<ProviderResponse> {
        let channel: Arc<dyn DeliveryChannel> = self.subscriptions.clone();

        if delayed {
            return self.deliver_delayed(channel, address, source, local).await;
        }

        let coordinator = if local {
            SendCoordinator::local(channel, source, address)
        } else {
            SendCoordinator::new(channel, source, self.policy, address)
        };
        let transaction = coordinator.run().await?;
        let output = call
            .as_ref()
            .and_then(|call| decode_output(self.collaborators.runtime.as_ref(), &transaction, call));

        Ok(ProviderResponse::Sent {
            transaction,
            output,
        })
    }

    /// Compose the first message now, deliver in the background and report
    /// the outcome as `messageStatusUpdated`.
    async fn deliver_delayed(
        &self,
        channel: Arc<dyn DeliveryChannel>,
        address: Address,
        source: Arc<dyn MessageSource>,
        local: bool,
    ) -> ClientResult<ProviderResponse> {
        let timeout = if local {
            LOCAL_EXECUTION_TIMEOUT_SECS
        } else {
            self.policy.initial_timeout()
        };
        let first = source.compose(timeout_duration(timeout)).await?;
        let message = DelayedMessage {
            account: address.clone(),
            hash: first.hash.clone(),
            expire_at: first.expire_at,
        };

        let events = self.events.clone();
        let hash = first.hash.clone();
        let task_address = address.clone();
        let policy = self.policy;
        tokio::spawn(async move {
            let result = if local {
                channel.send_message_locally(&task_address, &first).await
            } else {
                SendCoordinator::new(channel, source, policy, task_address.clone())
                    .with_first_message(first)
                    .run()
                    .await
            };

            let transaction = match result {
                Ok(transaction) => Some(transaction),
                Err(e) => {
                    tracing::info!(address = %task_address, hash = %hash, error = %e, "Delayed message not delivered");
                    None
                }
            };
            let _ = events.send(ProviderEvent::MessageStatusUpdated {
                address: task_address,
                hash,
                transaction,
            });
        });

        tracing::debug!(address = %address, hash = %message.hash, "Delayed message accepted");
        Ok(ProviderResponse::Delayed { message })
    }

    fn repack(&self, address: &str) -> ClientResult<Address> {
        Ok(self.collaborators.runtime.repack_address(address)?)
    }

    fn limit(&self, limit: Option<u8>) -> ClientResult<u8> {
        match limit {
            Some(0) => Err(ClientError::Validation(
                "Limit must be greater than zero".to_string(),
            )),
            Some(limit) => Ok(limit),
            None => Ok(self.page_size),
        }
    }
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Decode the call output of `transaction`, if it has one.
///
/// Decoding problems yield `None`.
pub fn decode_output(
    runtime: &dyn LedgerRuntime,
    transaction: &Transaction,
    call: &FunctionCall,
) -> Option<DecodedOutput> {
    match runtime.decode_transaction(transaction, call) {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(method = %call.method, error = %e, "Failed to decode transaction output");
            None
        }
    }
}

fn parse_amount(amount: &str) -> ClientResult<u128> {
    amount
        .trim()
        .parse()
        .map_err(|_| ClientError::Validation(format!("Invalid amount: {}", amount)))
}

fn parse_hash(hash: &str) -> ClientResult<Hash256> {
    if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(Hash256::new(hash))
    } else {
        Err(ClientError::Validation(format!("Invalid hash: {}", hash)))
    }
}
