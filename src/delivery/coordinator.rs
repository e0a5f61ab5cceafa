//! Retrying delivery state machine.
//!
//! # Responsibilities
//! - Compose, send and await each attempt with a growing timeout
//! - Fall back to local execution when attempts run out, or when forced
//! - Report the terminal state as a transaction or `MessageExpired`
//!
//! # Design Decisions
//! - One `step` per transition; callers may drive it manually
//! - A delayed send starts from `Sent` with a message composed up front
//! - Exhausted fallback only reports the exit code; it never confirms

use std::fmt;
use std::sync::Arc;

use crate::delivery::compose::MessageSource;
use crate::delivery::DeliveryChannel;
use crate::error::{ClientError, ClientResult};
use crate::ledger::{Address, SignedMessage, Transaction};
use crate::observability::metrics;
use crate::resilience::retries::{timeout_duration, RetryPolicy};

/// Expiration timeout of messages composed for forced local execution.
pub const LOCAL_EXECUTION_TIMEOUT_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The caller asked for local execution.
    Forced,
    /// Every network attempt expired.
    Exhausted,
}

/// Position of a send in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SendState {
    Composing {
        attempt: u32,
        timeout: f64,
    },
    Sent {
        attempt: u32,
        timeout: f64,
        message: SignedMessage,
    },
    Retrying {
        attempt: u32,
        timeout: f64,
    },
    LocalFallback {
        timeout: f64,
        reason: FallbackReason,
    },
    Confirmed(Transaction),
    ConfirmedLocal(Transaction),
    Expired {
        exit_code: Option<i32>,
    },
}

impl SendState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendState::Confirmed(_) | SendState::ConfirmedLocal(_) | SendState::Expired { .. }
        )
    }

    fn name(&self) -> &'static str {
        match self {
            SendState::Composing { .. } => "composing",
            SendState::Sent { .. } => "sent",
            SendState::Retrying { .. } => "retrying",
            SendState::LocalFallback { .. } => "local_fallback",
            SendState::Confirmed(_) => "confirmed",
            SendState::ConfirmedLocal(_) => "confirmed_local",
            SendState::Expired { .. } => "expired",
        }
    }
}

/// Drives one logical send to a terminal state.
pub struct SendCoordinator {
    channel: Arc<dyn DeliveryChannel>,
    source: Arc<dyn MessageSource>,
    policy: RetryPolicy,
    address: Address,
    state: SendState,
}

impl SendCoordinator {
    /// Network delivery with retries, starting with composition.
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        source: Arc<dyn MessageSource>,
        policy: RetryPolicy,
        address: Address,
    ) -> Self {
        let timeout = policy.initial_timeout();
        Self {
            channel,
            source,
            policy,
            address,
            state: SendState::Composing {
                attempt: 0,
                timeout,
            },
        }
    }

    /// Local execution only, with a fixed expiration timeout.
    pub fn local(
        channel: Arc<dyn DeliveryChannel>,
        source: Arc<dyn MessageSource>,
        address: Address,
    ) -> Self {
        Self {
            channel,
            source,
            policy: RetryPolicy::default(),
            address,
            state: SendState::LocalFallback {
                timeout: LOCAL_EXECUTION_TIMEOUT_SECS,
                reason: FallbackReason::Forced,
            },
        }
    }

    /// Resume with `message` already composed for the first attempt.
    pub fn with_first_message(mut self, message: SignedMessage) -> Self {
        if let SendState::Composing { attempt, timeout } = self.state {
            self.state = SendState::Sent {
                attempt,
                timeout,
                message,
            };
        }
        self
    }

    pub fn state(&self) -> &SendState {
        &self.state
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Perform one transition. Terminal states are left unchanged.
    pub async fn step(&mut self) -> ClientResult<()> {
        let next = match &self.state {
            SendState::Composing { attempt, timeout } => {
                let message = self.source.compose(timeout_duration(*timeout)).await?;
                tracing::debug!(
                    address = %self.address,
                    attempt,
                    timeout,
                    hash = %message.hash,
                    expire_at = message.expire_at,
                    "Message composed"
                );
                SendState::Sent {
                    attempt: *attempt,
                    timeout: *timeout,
                    message,
                }
            }
            SendState::Sent {
                attempt,
                timeout,
                message,
            } => match self.channel.send_message(&self.address, message).await {
                Some(transaction) => SendState::Confirmed(transaction),
                None if attempt + 1 < self.policy.retry_count() => SendState::Retrying {
                    attempt: *attempt,
                    timeout: *timeout,
                },
                None => {
                    tracing::info!(
                        address = %self.address,
                        attempts = attempt + 1,
                        "Delivery attempts exhausted, running locally"
                    );
                    SendState::LocalFallback {
                        timeout: *timeout,
                        reason: FallbackReason::Exhausted,
                    }
                }
            },
            SendState::Retrying { attempt, timeout } => {
                metrics::record_message_retry();
                let timeout = self.policy.grow(*timeout);
                tracing::info!(
                    address = %self.address,
                    attempt = attempt + 1,
                    timeout,
                    "Message expired, retrying"
                );
                SendState::Composing {
                    attempt: attempt + 1,
                    timeout,
                }
            }
            SendState::LocalFallback { timeout, reason } => {
                self.run_locally(*timeout, *reason).await?
            }
            SendState::Confirmed(_) | SendState::ConfirmedLocal(_) | SendState::Expired { .. } => {
                return Ok(());
            }
        };

        self.state = next;
        Ok(())
    }

    async fn run_locally(&self, timeout: f64, reason: FallbackReason) -> ClientResult<SendState> {
        match reason {
            FallbackReason::Forced => {
                let message = self.source.compose(timeout_duration(timeout)).await?;
                let transaction = self
                    .channel
                    .send_message_locally(&self.address, &message)
                    .await?;
                Ok(SendState::ConfirmedLocal(transaction))
            }
            FallbackReason::Exhausted => {
                let local = match self.source.compose(timeout_duration(timeout)).await {
                    Ok(message) => {
                        self.channel
                            .send_message_locally(&self.address, &message)
                            .await
                    }
                    Err(e) => Err(e),
                };
                let exit_code = match local {
                    Ok(transaction) => transaction.exit_code,
                    Err(e) => {
                        tracing::warn!(address = %self.address, error = %e, "Local execution of expired message failed");
                        None
                    }
                };
                Ok(SendState::Expired { exit_code })
            }
        }
    }

    /// Step until a terminal state.
    pub async fn run(mut self) -> ClientResult<Transaction> {
        let result = self.drive().await;

        let outcome = match (&result, &self.state) {
            (Ok(_), SendState::ConfirmedLocal(_)) => "confirmed_local",
            (Ok(_), _) => "confirmed",
            (Err(ClientError::MessageExpired { .. }), _) => "expired",
            (Err(_), _) => "failed",
        };
        metrics::record_message_outcome(outcome);
        tracing::debug!(address = %self.address, outcome, "Send finished");

        result
    }

    async fn drive(&mut self) -> ClientResult<Transaction> {
        loop {
            match &self.state {
                SendState::Confirmed(transaction) | SendState::ConfirmedLocal(transaction) => {
                    return Ok(transaction.clone());
                }
                SendState::Expired { exit_code } => {
                    return Err(ClientError::MessageExpired {
                        exit_code: *exit_code,
                    });
                }
                _ => self.step().await?,
            }
        }
    }
}

impl fmt::Debug for SendCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendCoordinator")
            .field("address", &self.address)
            .field("state", &self.state.name())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::ledger::{Hash256, TransactionId};

    fn transaction(lt: u64, exit_code: Option<i32>) -> Transaction {
        Transaction {
            id: TransactionId {
                lt,
                hash: Hash256::new(format!("{:064x}", lt)),
            },
            prev_transaction_id: None,
            created_at: 0,
            aborted: exit_code.is_some(),
            exit_code,
            in_message: None,
            out_messages: Vec::new(),
        }
    }

    /// Records composition timeouts and numbers every message.
    #[derive(Default)]
    struct CountingSource {
        timeouts: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl MessageSource for CountingSource {
        async fn compose(&self, timeout: Duration) -> ClientResult<SignedMessage> {
            let mut timeouts = self.timeouts.lock().unwrap();
            timeouts.push(timeout);
            Ok(SignedMessage {
                hash: Hash256::new(format!("{:02x}", timeouts.len())),
                expire_at: timeout.as_secs() as u32,
                boc: String::new(),
            })
        }
    }

    /// Answers sends from a script; local runs from a fixed result.
    struct ScriptedChannel {
        confirmations: Mutex<VecDeque<Option<Transaction>>>,
        local: ClientResult<Transaction>,
        sent: Mutex<Vec<Hash256>>,
        local_runs: Mutex<usize>,
    }

    impl ScriptedChannel {
        fn new(confirmations: Vec<Option<Transaction>>, local: ClientResult<Transaction>) -> Self {
            Self {
                confirmations: Mutex::new(confirmations.into()),
                local,
                sent: Mutex::new(Vec::new()),
                local_runs: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl DeliveryChannel for ScriptedChannel {
        async fn send_message(&self, _address: &Address, message: &SignedMessage) -> Option<Transaction> {
            self.sent.lock().unwrap().push(message.hash.clone());
            self.confirmations.lock().unwrap().pop_front().flatten()
        }

        async fn send_message_locally(
            &self,
            _address: &Address,
            _message: &SignedMessage,
        ) -> ClientResult<Transaction> {
            *self.local_runs.lock().unwrap() += 1;
            self.local.clone()
        }
    }

    fn coordinator(
        channel: &Arc<ScriptedChannel>,
        source: &Arc<CountingSource>,
        policy: RetryPolicy,
    ) -> SendCoordinator {
        SendCoordinator::new(channel.clone(), source.clone(), policy, Address::new("0:aa"))
    }

    #[tokio::test]
    async fn test_confirmed_after_retries_with_growing_timeouts() {
        let channel = Arc::new(ScriptedChannel::new(
            vec![None, None, Some(transaction(7, None))],
            Err(ClientError::Execution("unused".to_string())),
        ));
        let source = Arc::new(CountingSource::default());

        let tx = coordinator(&channel, &source, RetryPolicy::default())
            .run()
            .await
            .unwrap();

        assert_eq!(tx.id.lt, 7);
        assert_eq!(channel.sent.lock().unwrap().len(), 3);
        assert_eq!(*channel.local_runs.lock().unwrap(), 0);
        let timeouts = source.timeouts.lock().unwrap();
        let expected = [60.0, 72.0, 86.4];
        assert_eq!(timeouts.len(), expected.len());
        for (actual, expected) in timeouts.iter().zip(expected) {
            assert!((actual.as_secs_f64() - expected).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_step_transitions() {
        let channel = Arc::new(ScriptedChannel::new(
            vec![None],
            Ok(transaction(3, Some(60))),
        ));
        let source = Arc::new(CountingSource::default());
        let mut send = coordinator(&channel, &source, RetryPolicy::new(2, 10, 2.0));

        assert!(matches!(send.state(), SendState::Composing { attempt: 0, .. }));
        send.step().await.unwrap();
        assert!(matches!(send.state(), SendState::Sent { attempt: 0, .. }));
        send.step().await.unwrap();
        assert!(matches!(send.state(), SendState::Retrying { attempt: 0, .. }));
        send.step().await.unwrap();
        assert_eq!(
            send.state(),
            &SendState::Composing {
                attempt: 1,
                timeout: 20.0
            }
        );
        send.step().await.unwrap();
        send.step().await.unwrap();
        assert_eq!(
            send.state(),
            &SendState::LocalFallback {
                timeout: 20.0,
                reason: FallbackReason::Exhausted
            }
        );
        send.step().await.unwrap();
        assert_eq!(send.state(), &SendState::Expired { exit_code: Some(60) });
        assert!(send.state().is_terminal());

        // Terminal states do not move
        send.step().await.unwrap();
        assert!(send.state().is_terminal());
    }

    #[tokio::test]
    async fn test_exhausted_reports_exit_code() {
        let channel = Arc::new(ScriptedChannel::new(
            vec![None],
            Ok(transaction(3, Some(60))),
        ));
        let source = Arc::new(CountingSource::default());

        let err = coordinator(&channel, &source, RetryPolicy::new(1, 1, 1.2))
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Message expired. Possible exit code: 60");
        // Fresh message for the local run
        assert_eq!(source.timeouts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_local_failure_has_no_exit_code() {
        let channel = Arc::new(ScriptedChannel::new(
            vec![None],
            Err(ClientError::Execution("no account".to_string())),
        ));
        let source = Arc::new(CountingSource::default());

        let err = coordinator(&channel, &source, RetryPolicy::new(1, 1, 1.2))
            .run()
            .await
            .unwrap_err();

        assert_eq!(err, ClientError::MessageExpired { exit_code: None });
        assert_eq!(err.to_string(), "Message expired");
    }

    #[tokio::test]
    async fn test_forced_local() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new(), Ok(transaction(5, Some(101)))));
        let source = Arc::new(CountingSource::default());

        let tx = SendCoordinator::local(channel.clone(), source.clone(), Address::new("0:aa"))
            .run()
            .await
            .unwrap();

        // An aborting contract still yields its transaction
        assert_eq!(tx.exit_code, Some(101));
        assert!(channel.sent.lock().unwrap().is_empty());
        assert_eq!(*source.timeouts.lock().unwrap(), vec![Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn test_forced_local_failure() {
        let channel = Arc::new(ScriptedChannel::new(
            Vec::new(),
            Err(ClientError::Execution("vm unavailable".to_string())),
        ));
        let source = Arc::new(CountingSource::default());

        let err = SendCoordinator::local(channel, source, Address::new("0:aa"))
            .run()
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Execution("vm unavailable".to_string()));
    }

    #[tokio::test]
    async fn test_first_message_is_sent_without_composing() {
        let channel = Arc::new(ScriptedChannel::new(
            vec![Some(transaction(9, None))],
            Err(ClientError::Execution("unused".to_string())),
        ));
        let source = Arc::new(CountingSource::default());
        let first = SignedMessage {
            hash: Hash256::new("aa"),
            expire_at: 60,
            boc: String::new(),
        };

        let tx = coordinator(&channel, &source, RetryPolicy::default())
            .with_first_message(first)
            .run()
            .await
            .unwrap();

        assert_eq!(tx.id.lt, 9);
        assert!(source.timeouts.lock().unwrap().is_empty());
        assert_eq!(*channel.sent.lock().unwrap(), vec![Hash256::new("aa")]);
    }
}
