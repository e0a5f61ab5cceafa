//! JSON-RPC transport over HTTP.
//!
//! # Responsibilities
//! - Issue JSON-RPC 2.0 calls with a per-request timeout
//! - Map endpoint and network failures to `TransportError`
//! - Emulate subscriptions by polling account state
//!
//! # Design Decisions
//! - Payloads are the crate's serde models; no ledger binary formats here
//! - Polling pages transactions newest-first down to the last known lt
//! - Poll failures back off exponentially instead of ending the stream

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, timeout};
use url::Url;

use crate::config::{EndpointConfig, ProtocolKind};
use crate::ledger::{
    Address, ContractState, FullContractState, GenTimings, Hash256, NetworkInfo, SignedMessage,
    Transaction, TransactionsBatchInfo,
};
use crate::resilience::backoff::PollBackoff;
use crate::transport::{
    Transport, TransportError, TransportEvent, TransportFactory, TransportResult, TransportStream,
};

/// Upper bound on pages fetched for one poll.
const MAX_PAGES_PER_POLL: usize = 10;
/// Upper bound on the delay between failing polls.
const MAX_POLL_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Deserialize)]
struct JrpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JrpcError>,
}

#[derive(Debug, Deserialize)]
struct JrpcError {
    code: i64,
    message: String,
}

/// Options shared by all transports a factory builds.
#[derive(Debug, Clone)]
pub struct JrpcOptions {
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub page_size: u8,
}

impl Default for JrpcOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            page_size: 50,
        }
    }
}

/// JSON-RPC client for one endpoint.
#[derive(Clone)]
pub struct JrpcTransport {
    client: reqwest::Client,
    endpoint: Url,
    options: JrpcOptions,
    next_id: Arc<AtomicU64>,
}

impl JrpcTransport {
    pub fn new(client: reqwest::Client, endpoint: Url, options: JrpcOptions) -> Self {
        Self {
            client,
            endpoint,
            options,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> TransportResult<R> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let request = self.client.post(self.endpoint.clone()).json(&body).send();
        let response = match timeout(self.options.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(TransportError::Request(e.to_string())),
            Err(_) => {
                return Err(TransportError::Timeout(self.options.request_timeout.as_secs()))
            }
        };

        if !response.status().is_success() {
            return Err(TransportError::Request(format!(
                "{} returned status {}",
                method,
                response.status()
            )));
        }

        let envelope: JrpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        decode_envelope(envelope)
    }

    async fn poll_once(&self, poll: &mut PollState) -> TransportResult<()> {
        let state = match self.get_full_contract_state(&poll.address).await? {
            Some(full) => full.state,
            None => missing_account_state(),
        };
        let last_lt = state.last_transaction_id.as_ref().map(|id| id.lt).unwrap_or(0);

        let known_lt = match poll.known_lt {
            Some(known_lt) => known_lt,
            None => {
                poll.known_lt = Some(last_lt);
                poll.queue.push_back(TransportEvent::StateChanged(state));
                return Ok(());
            }
        };

        if last_lt > known_lt {
            let transactions = self.fetch_newer_than(&poll.address, known_lt).await?;
            if let Some(batch_info) = TransactionsBatchInfo::of(&transactions) {
                poll.queue.push_back(TransportEvent::TransactionsFound {
                    transactions,
                    batch_info,
                });
            }
            poll.known_lt = Some(last_lt);
        }

        poll.queue.push_back(TransportEvent::StateChanged(state));
        Ok(())
    }

    async fn fetch_newer_than(
        &self,
        address: &Address,
        known_lt: u64,
    ) -> TransportResult<Vec<Transaction>> {
        let page_size = self.options.page_size;
        let mut collected = Vec::new();
        let mut before_lt = None;

        for _ in 0..MAX_PAGES_PER_POLL {
            let page = self.get_transactions(address, before_lt, page_size).await?;
            match absorb_page(&mut collected, page, known_lt, page_size) {
                PageStep::Done => return Ok(collected),
                PageStep::Continue(oldest) => before_lt = Some(oldest),
            }
        }

        tracing::warn!(
            address = %address,
            known_lt,
            fetched = collected.len(),
            pages = MAX_PAGES_PER_POLL,
            "Transaction backlog exceeds the poll page budget, older transactions skipped"
        );
        Ok(collected)
    }
}

/// What to do after absorbing one page of the newest-first history.
#[derive(Debug, PartialEq, Eq)]
enum PageStep {
    Done,
    /// Fetch the page before this lt.
    Continue(u64),
}

fn absorb_page(
    collected: &mut Vec<Transaction>,
    page: Vec<Transaction>,
    known_lt: u64,
    page_size: u8,
) -> PageStep {
    let full = page.len() >= page_size as usize;
    let oldest = page.iter().map(|tx| tx.id.lt).min();
    let reached_known = page.iter().any(|tx| tx.id.lt <= known_lt);
    collected.extend(page.into_iter().filter(|tx| tx.id.lt > known_lt));

    match oldest {
        Some(oldest) if full && !reached_known => PageStep::Continue(oldest),
        _ => PageStep::Done,
    }
}

fn decode_envelope<R: DeserializeOwned>(envelope: JrpcResponse) -> TransportResult<R> {
    if let Some(error) = envelope.error {
        return Err(TransportError::Endpoint {
            code: error.code,
            message: error.message,
        });
    }
    serde_json::from_value(envelope.result.unwrap_or(Value::Null))
        .map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

fn missing_account_state() -> ContractState {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    ContractState {
        balance: 0,
        gen_timings: GenTimings {
            gen_lt: 0,
            gen_utime: now,
        },
        last_transaction_id: None,
        is_deployed: false,
        code_hash: None,
    }
}

struct PollState {
    transport: JrpcTransport,
    address: Address,
    known_lt: Option<u64>,
    queue: VecDeque<TransportEvent>,
    backoff: PollBackoff,
}

#[async_trait]
impl Transport for JrpcTransport {
    async fn network_info(&self) -> TransportResult<NetworkInfo> {
        self.call("getCapabilities", json!({})).await
    }

    async fn get_full_contract_state(
        &self,
        address: &Address,
    ) -> TransportResult<Option<FullContractState>> {
        self.call("getContractState", json!({ "address": address }))
            .await
    }

    async fn get_transactions(
        &self,
        address: &Address,
        before_lt: Option<u64>,
        limit: u8,
    ) -> TransportResult<Vec<Transaction>> {
        self.call(
            "getTransactionsList",
            json!({
                "account": address,
                "beforeLt": before_lt.map(|lt| lt.to_string()),
                "limit": limit,
            }),
        )
        .await
    }

    async fn get_transaction(&self, hash: &Hash256) -> TransportResult<Option<Transaction>> {
        self.call("getTransaction", json!({ "id": hash })).await
    }

    async fn get_accounts_by_code_hash(
        &self,
        code_hash: &Hash256,
        limit: u8,
        continuation: Option<&Address>,
    ) -> TransportResult<Vec<Address>> {
        self.call(
            "getAccountsByCodeHash",
            json!({
                "codeHash": code_hash,
                "limit": limit,
                "continuation": continuation,
            }),
        )
        .await
    }

    async fn send_message(&self, message: &SignedMessage) -> TransportResult<()> {
        let _: Value = self
            .call("sendMessage", json!({ "message": message.boc }))
            .await?;
        Ok(())
    }

    async fn subscribe(&self, address: &Address) -> TransportResult<TransportStream> {
        let mut poll = PollState {
            transport: self.clone(),
            address: address.clone(),
            known_lt: None,
            queue: VecDeque::new(),
            backoff: PollBackoff::new(
                self.options.poll_interval,
                Duration::from_millis(MAX_POLL_BACKOFF_MS),
            ),
        };

        // Baseline lt is fixed before returning so that anything broadcast
        // afterwards shows up as a newer transaction.
        self.poll_once(&mut poll).await?;

        let stream = futures_util::stream::unfold(poll, |mut poll| async move {
            loop {
                if let Some(event) = poll.queue.pop_front() {
                    return Some((event, poll));
                }

                sleep(poll.backoff.delay()).await;

                let transport = poll.transport.clone();
                match transport.poll_once(&mut poll).await {
                    Ok(()) => poll.backoff.record_success(),
                    Err(e) => {
                        let failures = poll.backoff.record_failure();
                        tracing::warn!(
                            address = %poll.address,
                            failures,
                            error = %e,
                            "Subscription poll failed"
                        );
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

impl std::fmt::Debug for JrpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JrpcTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout_secs", &self.options.request_timeout.as_secs())
            .finish()
    }
}

/// Builds `JrpcTransport`s for `jrpc` presets.
#[derive(Debug, Clone, Default)]
pub struct JrpcTransportFactory {
    client: reqwest::Client,
    options: JrpcOptions,
}

impl JrpcTransportFactory {
    pub fn new(options: JrpcOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            options,
        }
    }
}

#[async_trait]
impl TransportFactory for JrpcTransportFactory {
    async fn connect(
        &self,
        kind: ProtocolKind,
        endpoint: &EndpointConfig,
    ) -> TransportResult<Arc<dyn Transport>> {
        if kind != ProtocolKind::Jrpc {
            return Err(TransportError::Unsupported(kind));
        }
        let url = Url::parse(&endpoint.url).map_err(|e| {
            TransportError::Request(format!("Invalid endpoint URL '{}': {}", endpoint.url, e))
        })?;
        Ok(Arc::new(JrpcTransport::new(
            self.client.clone(),
            url,
            self.options.clone(),
        )))
    }
}
