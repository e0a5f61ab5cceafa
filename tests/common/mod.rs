//! In-memory collaborators shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use ledger_link::config::{ClientConfig, ConnectionPreset, EndpointConfig, ProtocolKind};
use ledger_link::ledger::{
    Account, AccountsStorage, Address, Clock, ContractState, DecodedOutput,
    ExternalMessageRequest, FullContractState, FunctionCall, GenTimings, Hash256, Keystore,
    LedgerRuntime, Message, NetworkInfo, PrepareContext, PublicKey, RuntimeError, RuntimeResult,
    Signature, SignedMessage, Signer, Transaction, TransactionId, TransactionsBatchInfo,
    TransferParams, UnsignedMessage,
};
use ledger_link::provider::{Collaborators, ProviderEvent, ProviderSession};
use ledger_link::transport::{
    Transport, TransportError, TransportEvent, TransportFactory, TransportResult,
    TransportStream,
};

pub const NETWORK_ID: i32 = 42;

pub fn address(n: u8) -> Address {
    Address::new(format!("0:{:064x}", n))
}

pub fn preset(group: &str, urls: &[&str]) -> ConnectionPreset {
    ConnectionPreset {
        group: group.to_string(),
        kind: ProtocolKind::Jrpc,
        endpoints: urls
            .iter()
            .map(|url| EndpointConfig {
                url: url.to_string(),
            })
            .collect(),
    }
}

/// Config with one preset `main`, a single short attempt and no grace.
pub fn test_config(urls: &[&str]) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.connection.selected = "main".to_string();
    config.connection.connect_timeout_secs = 2;
    config.connection.presets = vec![preset("main", urls)];
    config.connection.health_check.enabled = false;
    config.message.retry_count = 1;
    config.message.timeout_secs = 1;
    config.subscriptions.expiry_grace_secs = 0;
    config
}

pub fn transaction(lt: u64, in_hash: Option<&Hash256>, created_at: u32) -> Transaction {
    Transaction {
        id: TransactionId {
            lt,
            hash: Hash256::new(format!("{:064x}", lt)),
        },
        prev_transaction_id: None,
        created_at,
        aborted: false,
        exit_code: None,
        in_message: in_hash.map(|hash| Message {
            hash: hash.clone(),
            src: None,
            dst: None,
            value: 0,
            bounce: false,
            bounced: false,
            body: None,
        }),
        out_messages: Vec::new(),
    }
}

pub fn contract_state(balance: u128, gen_utime: u32) -> ContractState {
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

pub fn found(transactions: Vec<Transaction>) -> TransportEvent {
    let batch_info = TransactionsBatchInfo::of(&transactions).expect("non-empty batch");
    TransportEvent::TransactionsFound {
        transactions,
        batch_info,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decrements the live stream counter when a subscription stream is dropped.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scriptable transport. Messages carry their destination address in `boc`.
pub struct MockTransport {
    pub network_id: i32,
    pub fail_network_info: AtomicBool,
    pub fail_send: AtomicBool,
    /// Sends from this 1-based index on are confirmed; 0 disables.
    pub confirm_from: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    pub live_streams: Arc<AtomicUsize>,
    pub sent: Mutex<Vec<SignedMessage>>,
    pub full_state: Mutex<Option<FullContractState>>,
    pub history: Mutex<Vec<Transaction>>,
    streams: Mutex<HashMap<Address, Vec<mpsc::UnboundedSender<TransportEvent>>>>,
    next_lt: AtomicU64,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            network_id: NETWORK_ID,
            fail_network_info: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            confirm_from: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            live_streams: Arc::new(AtomicUsize::new(0)),
            sent: Mutex::new(Vec::new()),
            full_state: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            streams: Mutex::new(HashMap::new()),
            next_lt: AtomicU64::new(1_000),
        })
    }

    /// Confirm every send starting with the `n`-th.
    pub fn confirm_from(&self, n: usize) {
        self.confirm_from.store(n, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Deliver `event` to every open stream of `address`.
    pub fn push(&self, address: &Address, event: TransportEvent) {
        let mut streams = self.streams.lock().unwrap();
        if let Some(senders) = streams.get_mut(address) {
            senders.retain(|sender| sender.send(event.clone()).is_ok());
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn network_info(&self) -> TransportResult<NetworkInfo> {
        if self.fail_network_info.load(Ordering::SeqCst) {
            return Err(TransportError::Request("network info unavailable".to_string()));
        }
        Ok(NetworkInfo {
            network_id: self.network_id,
            description: None,
        })
    }

    async fn get_full_contract_state(
        &self,
        _address: &Address,
    ) -> TransportResult<Option<FullContractState>> {
        Ok(self.full_state.lock().unwrap().clone())
    }

    async fn get_transactions(
        &self,
        _address: &Address,
        before_lt: Option<u64>,
        limit: u8,
    ) -> TransportResult<Vec<Transaction>> {
        let history = self.history.lock().unwrap();
        Ok(history
            .iter()
            .filter(|tx| before_lt.map_or(true, |lt| tx.id.lt < lt))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, hash: &Hash256) -> TransportResult<Option<Transaction>> {
        let history = self.history.lock().unwrap();
        Ok(history.iter().find(|tx| &tx.id.hash == hash).cloned())
    }

    async fn get_accounts_by_code_hash(
        &self,
        _code_hash: &Hash256,
        limit: u8,
        _continuation: Option<&Address>,
    ) -> TransportResult<Vec<Address>> {
        Ok((1..=limit).map(address).collect())
    }

    async fn send_message(&self, message: &SignedMessage) -> TransportResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::Request("broadcast refused".to_string()));
        }

        let index = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            sent.len()
        };

        let confirm_from = self.confirm_from.load(Ordering::SeqCst);
        if confirm_from > 0 && index >= confirm_from {
            let lt = self.next_lt.fetch_add(1, Ordering::SeqCst);
            let tx = transaction(lt, Some(&message.hash), message.expire_at);
            self.push(&Address::new(message.boc.clone()), found(vec![tx]));
        }
        Ok(())
    }

    async fn subscribe(&self, address: &Address) -> TransportResult<TransportStream> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        // Give concurrent subscribers a chance to race
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default()
            .push(tx);

        self.live_streams.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(self.live_streams.clone());

        let stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|event| (event, (rx, guard)))
        });
        Ok(Box::pin(stream))
    }
}

/// Factory serving `MockTransport`s by endpoint URL.
pub struct MockFactory {
    transports: HashMap<String, Arc<MockTransport>>,
    pub failing: Mutex<HashSet<String>>,
    pub connects: AtomicUsize,
    pub delay: Duration,
}

impl MockFactory {
    pub fn new(urls: &[&str]) -> Self {
        Self {
            transports: urls
                .iter()
                .map(|url| (url.to_string(), MockTransport::new()))
                .collect(),
            failing: Mutex::new(HashSet::new()),
            connects: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn transport(&self, url: &str) -> Arc<MockTransport> {
        self.transports[url].clone()
    }

    pub fn set_failing(&self, url: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(url.to_string());
        } else {
            set.remove(url);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn connect(
        &self,
        _kind: ProtocolKind,
        endpoint: &EndpointConfig,
    ) -> TransportResult<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.lock().unwrap().contains(&endpoint.url) {
            return Err(TransportError::Request("connection refused".to_string()));
        }
        match self.transports.get(&endpoint.url) {
            Some(transport) => Ok(transport.clone() as Arc<dyn Transport>),
            None => Err(TransportError::Request("unknown endpoint".to_string())),
        }
    }
}

/// Unsigned external message whose boc names its recipient.
struct MockUnsigned {
    hash: Vec<u8>,
    expire_at: u32,
    recipient: Address,
}

impl UnsignedMessage for MockUnsigned {
    fn hash(&self) -> &[u8] {
        &self.hash
    }

    fn expire_at(&self) -> u32 {
        self.expire_at
    }

    fn sign(&self, _signature: &Signature) -> RuntimeResult<SignedMessage> {
        self.without_signature()
    }

    fn without_signature(&self) -> RuntimeResult<SignedMessage> {
        Ok(SignedMessage {
            hash: Hash256::new(hex(&self.hash)),
            expire_at: self.expire_at,
            boc: self.recipient.to_string(),
        })
    }
}

/// Runtime with scriptable local execution.
pub struct MockRuntime {
    next_message: AtomicU64,
    /// Exit code of locally executed transactions.
    pub local_exit_code: Mutex<Option<i32>>,
    pub local_fails: AtomicBool,
    pub local_runs: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_message: AtomicU64::new(1),
            local_exit_code: Mutex::new(None),
            local_fails: AtomicBool::new(false),
            local_runs: AtomicUsize::new(0),
        })
    }
}

impl LedgerRuntime for MockRuntime {
    fn repack_address(&self, address: &str) -> RuntimeResult<Address> {
        match address.split_once(':') {
            Some((workchain, account)) if !workchain.is_empty() && !account.is_empty() => {
                Ok(Address::new(address.to_lowercase()))
            }
            _ => Err(RuntimeError::InvalidAddress(address.to_string())),
        }
    }

    fn create_external_message(
        &self,
        clock: &Clock,
        request: &ExternalMessageRequest,
        timeout: Duration,
    ) -> RuntimeResult<Box<dyn UnsignedMessage>> {
        let id = self.next_message.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockUnsigned {
            hash: id.to_be_bytes().to_vec(),
            expire_at: clock.now_sec() + timeout.as_secs() as u32,
            recipient: request.recipient.clone(),
        }))
    }

    fn decode_transaction(
        &self,
        transaction: &Transaction,
        call: &FunctionCall,
    ) -> RuntimeResult<Option<DecodedOutput>> {
        if call.method == "broken" {
            return Err(RuntimeError::Decode("unknown function".to_string()));
        }
        Ok(Some(DecodedOutput {
            method: call.method.clone(),
            output: json!({ "lt": transaction.id.lt }),
        }))
    }

    fn run_local(
        &self,
        _clock: &Clock,
        _state: Option<&FullContractState>,
        message: &SignedMessage,
    ) -> RuntimeResult<Transaction> {
        self.local_runs.fetch_add(1, Ordering::SeqCst);
        if self.local_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::Execution("account state unavailable".to_string()));
        }
        let exit_code = *self.local_exit_code.lock().unwrap();
        let mut tx = transaction(1, Some(&message.hash), message.expire_at);
        tx.exit_code = exit_code;
        tx.aborted = exit_code.is_some_and(|code| code != 0);
        Ok(tx)
    }
}

pub struct MockSigner {
    public_key: PublicKey,
}

#[async_trait]
impl Signer for MockSigner {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    async fn sign(&self, data: &[u8]) -> RuntimeResult<Signature> {
        Ok(Signature(hex(data)))
    }
}

pub struct MockKeystore {
    keys: Vec<PublicKey>,
}

impl MockKeystore {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| PublicKey(k.to_string())).collect(),
        }
    }
}

#[async_trait]
impl Keystore for MockKeystore {
    async fn get_signer(&self, public_key: &PublicKey) -> Option<Arc<dyn Signer>> {
        self.keys.contains(public_key).then(|| {
            Arc::new(MockSigner {
                public_key: public_key.clone(),
            }) as Arc<dyn Signer>
        })
    }
}

/// Wallet account that records the timeout of every prepared message.
pub struct MockAccount {
    address: Address,
    next_message: AtomicU64,
    pub timeouts: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Account for MockAccount {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn prepare_message(
        &self,
        params: &TransferParams,
        ctx: PrepareContext<'_>,
    ) -> RuntimeResult<SignedMessage> {
        if params.amount == 0 {
            return Err(RuntimeError::Encode("zero amount".to_string()));
        }
        self.timeouts.lock().unwrap().push(ctx.timeout);
        let id = self.next_message.fetch_add(1, Ordering::SeqCst);
        Ok(SignedMessage {
            hash: Hash256::new(format!("{:062x}{:02x}", id, 0xaa)),
            expire_at: ctx.clock.now_sec() + ctx.timeout.as_secs() as u32,
            boc: self.address.to_string(),
        })
    }
}

pub struct MockAccounts {
    accounts: HashMap<Address, Arc<MockAccount>>,
}

impl MockAccounts {
    pub fn new(addresses: &[Address]) -> Self {
        Self {
            accounts: addresses
                .iter()
                .map(|address| {
                    (
                        address.clone(),
                        Arc::new(MockAccount {
                            address: address.clone(),
                            next_message: AtomicU64::new(1),
                            timeouts: Mutex::new(Vec::new()),
                        }),
                    )
                })
                .collect(),
        }
    }

    pub fn account(&self, address: &Address) -> Arc<MockAccount> {
        self.accounts[address].clone()
    }
}

#[async_trait]
impl AccountsStorage for MockAccounts {
    async fn get_account(&self, address: &Address) -> Option<Arc<dyn Account>> {
        self.accounts
            .get(address)
            .map(|account| account.clone() as Arc<dyn Account>)
    }
}

pub const ENDPOINT: &str = "mock://primary";
pub const PUBLIC_KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

/// A session wired to mocks, with its event stream attached.
pub struct Harness {
    pub session: ProviderSession,
    pub factory: Arc<MockFactory>,
    pub transport: Arc<MockTransport>,
    pub runtime: Arc<MockRuntime>,
    pub accounts: Arc<MockAccounts>,
    pub events: mpsc::UnboundedReceiver<ProviderEvent>,
    pub wallet: Address,
}

impl Harness {
    pub fn new(config: ClientConfig) -> Self {
        let urls: Vec<String> = config
            .connection
            .presets
            .iter()
            .flat_map(|preset| preset.endpoints.iter().map(|e| e.url.clone()))
            .collect();
        let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();

        let factory = Arc::new(MockFactory::new(&url_refs));
        let transport = factory.transport(ENDPOINT);
        let runtime = MockRuntime::new();
        let wallet = address(1);
        let accounts = Arc::new(MockAccounts::new(&[wallet.clone()]));

        let collaborators = Collaborators {
            runtime: runtime.clone(),
            keystore: Arc::new(MockKeystore::new(&[PUBLIC_KEY])),
            accounts: accounts.clone(),
            clock: Arc::new(Clock::new()),
        };
        let session = ProviderSession::new(&config, factory.clone(), collaborators)
            .expect("session");

        let (tx, events) = mpsc::unbounded_channel();
        assert!(session.attach_event_sink(tx));

        Self {
            session,
            factory,
            transport,
            runtime,
            accounts,
            events,
            wallet,
        }
    }

    /// Wait for the next event, failing after `timeout`.
    pub async fn next_event(&mut self, timeout: Duration) -> ProviderEvent {
        tokio::time::timeout(timeout, self.events.recv())
            .await
            .expect("event timeout")
            .expect("event channel closed")
    }
}

/// Serve one canned JSON-RPC body per connection, after reading the request.
pub async fn start_jrpc_backend(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        read_request(&mut socket).await;
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                return;
            }
        }
    }
}
