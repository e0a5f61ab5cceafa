//! Active transport selection and scoped access.
//!
//! # Responsibilities
//! - Select the first answering endpoint of a preset, in list order
//! - Share one in-flight connect attempt among concurrent callers
//! - Re-select after the active connection is marked unhealthy
//! - Switch presets once in-flight scoped uses have finished

use arc_swap::{ArcSwap, ArcSwapOption};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::config::{ConnectionPreset, EndpointConfig};
use crate::connection::active::ActiveConnection;
use crate::observability::metrics;
use crate::transport::{Transport, TransportError, TransportFactory};

/// Why one candidate endpoint was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    pub endpoint: String,
    pub reason: TransportError,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.endpoint, self.reason)
    }
}

/// Errors raised while establishing a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// Every candidate of the preset failed.
    #[error("No reachable endpoint in preset '{group}': {}", join_failures(.failures))]
    Unreachable {
        group: String,
        failures: Vec<CandidateFailure>,
    },

    #[error("Preset '{0}' has no endpoints")]
    NoEndpoints(String),

    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),
}

fn join_failures(failures: &[CandidateFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

type ConnectAttempt = Shared<BoxFuture<'static, ConnectionResult<Arc<ActiveConnection>>>>;

/// Owner of the single active transport.
pub struct ConnectionController {
    factory: Arc<dyn TransportFactory>,
    preset: ArcSwap<ConnectionPreset>,
    connect_timeout: Duration,
    active: ArcSwapOption<ActiveConnection>,
    /// Memoized in-flight connect attempt.
    pending: Mutex<Option<ConnectAttempt>>,
    /// Held for reading by scoped uses, for writing by preset switches.
    switch_lock: RwLock<()>,
}

impl ConnectionController {
    /// Create a controller for `preset`. No connection is made until first use.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        preset: ConnectionPreset,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            preset: ArcSwap::from_pointee(preset),
            connect_timeout,
            active: ArcSwapOption::empty(),
            pending: Mutex::new(None),
            switch_lock: RwLock::new(()),
        }
    }

    /// The last configured preset.
    pub fn preset(&self) -> Arc<ConnectionPreset> {
        self.preset.load_full()
    }

    /// The current connection, if one is established.
    pub fn active(&self) -> Option<Arc<ActiveConnection>> {
        self.active.load_full()
    }

    /// Connect to `preset`, replacing any current connection.
    pub async fn initialize(&self, preset: ConnectionPreset) -> ConnectionResult<Arc<ActiveConnection>> {
        self.switch_preset(preset).await
    }

    /// Run `f` with a ready transport, connecting first if needed.
    pub async fn with_transport<F, Fut, T>(&self, f: F) -> ConnectionResult<T>
    where
        F: FnOnce(Arc<dyn Transport>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_connection(move |connection| f(connection.transport.clone()))
            .await
    }

    /// Like [`with_transport`](Self::with_transport), but hands out the whole
    /// connection so callers can tell which one they were served by.
    pub async fn with_connection<F, Fut, T>(&self, f: F) -> ConnectionResult<T>
    where
        F: FnOnce(Arc<ActiveConnection>) -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.switch_lock.read().await;
        let connection = self.ready_connection().await?;
        Ok(f(connection).await)
    }

    /// Tear down the current connection and connect to `preset`.
    ///
    /// Subscriptions bound to the old transport are not carried over.
    pub async fn switch_preset(
        &self,
        preset: ConnectionPreset,
    ) -> ConnectionResult<Arc<ActiveConnection>> {
        let _guard = self.switch_lock.write().await;

        if let Some(previous) = self.active.swap(None) {
            tracing::info!(
                group = %previous.group,
                endpoint = %previous.endpoint,
                "Dropping active connection"
            );
        }
        *self.lock_pending() = None;

        tracing::info!(group = %preset.group, kind = %preset.kind, "Switching connection preset");
        self.preset.store(Arc::new(preset));
        self.ready_connection().await
    }

    /// Forget the current connection; the next use reconnects.
    pub fn disconnect(&self) {
        self.active.store(None);
    }

    async fn ready_connection(&self) -> ConnectionResult<Arc<ActiveConnection>> {
        if let Some(active) = self.active.load_full() {
            if active.is_healthy() {
                return Ok(active);
            }
            tracing::info!(
                group = %active.group,
                endpoint = %active.endpoint,
                "Active connection unhealthy, reselecting"
            );
        }

        let attempt = {
            let mut pending = self.lock_pending();
            match pending.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let attempt = connect_preset(
                        self.factory.clone(),
                        self.preset.load_full(),
                        self.connect_timeout,
                    )
                    .boxed()
                    .shared();
                    *pending = Some(attempt.clone());
                    attempt
                }
            }
        };

        let result = attempt.clone().await;

        // The first caller to observe the settled attempt publishes it
        let mut pending = self.lock_pending();
        if pending.as_ref().is_some_and(|p| p.ptr_eq(&attempt)) {
            *pending = None;
            if let Ok(connection) = &result {
                self.active.store(Some(connection.clone()));
            }
        }

        result
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<ConnectAttempt>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionController")
            .field("preset", &self.preset.load().group)
            .field("active", &self.active.load_full())
            .finish()
    }
}

/// Try each endpoint of `preset` in order.
async fn connect_preset(
    factory: Arc<dyn TransportFactory>,
    preset: Arc<ConnectionPreset>,
    connect_timeout: Duration,
) -> ConnectionResult<Arc<ActiveConnection>> {
    if preset.endpoints.is_empty() {
        return Err(ConnectionError::NoEndpoints(preset.group.clone()));
    }

    let mut failures = Vec::new();
    for endpoint in &preset.endpoints {
        match probe_endpoint(factory.as_ref(), &preset, endpoint, connect_timeout).await {
            Ok(connection) => {
                metrics::record_connection_attempt(&preset.group, "success");
                metrics::record_connection_health(&preset.group, true);
                tracing::info!(
                    group = %preset.group,
                    endpoint = %endpoint.url,
                    network_id = connection.network_id,
                    "Connection established"
                );
                return Ok(Arc::new(connection));
            }
            Err(reason) => {
                metrics::record_connection_attempt(&preset.group, "failure");
                tracing::warn!(
                    group = %preset.group,
                    endpoint = %endpoint.url,
                    error = %reason,
                    "Endpoint unreachable, trying next candidate"
                );
                failures.push(CandidateFailure {
                    endpoint: endpoint.url.clone(),
                    reason,
                });
            }
        }
    }

    Err(ConnectionError::Unreachable {
        group: preset.group.clone(),
        failures,
    })
}

async fn probe_endpoint(
    factory: &dyn TransportFactory,
    preset: &ConnectionPreset,
    endpoint: &EndpointConfig,
    connect_timeout: Duration,
) -> Result<ActiveConnection, TransportError> {
    let probe = async {
        let transport = factory.connect(preset.kind, endpoint).await?;
        let info = transport.network_info().await?;
        Ok::<_, TransportError>((transport, info))
    };

    let (transport, info) = match timeout(connect_timeout, probe).await {
        Ok(result) => result?,
        Err(_) => return Err(TransportError::Timeout(connect_timeout.as_secs())),
    };

    Ok(ActiveConnection::new(
        transport,
        preset.group.clone(),
        endpoint.url.clone(),
        info.network_id,
    ))
}
