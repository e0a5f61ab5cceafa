//! ledger-link daemon and inspection CLI.
//!
//! ```text
//! ledger-link --config ledger-link.toml status
//!     connect to the selected preset, print provider state as JSON
//!
//! ledger-link --config ledger-link.toml watch <address>...
//!     subscribe, log every event until Ctrl+C
//!     ├── health monitor (reselects endpoints on failure)
//!     ├── config watcher (switches preset when `selected` changes)
//!     └── optional Prometheus exporter
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use ledger_link::config::{load_config, watcher::ConfigWatcher, ClientConfig};
use ledger_link::connection::HealthMonitor;
use ledger_link::ledger::{Clock, NoKeys, WatchOnlyRuntime};
use ledger_link::lifecycle::{shutdown_signal, Shutdown};
use ledger_link::observability::{logging, metrics};
use ledger_link::provider::{Collaborators, ProviderEvent, ProviderRequest, ProviderSession};
use ledger_link::subscription::UpdateKinds;
use ledger_link::transport::jrpc::{JrpcOptions, JrpcTransportFactory};

#[derive(Parser)]
#[command(name = "ledger-link")]
#[command(about = "Wallet-side client for ledger gateways", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "ledger-link.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print the provider state
    Status,
    /// Subscribe to accounts and log their updates
    Watch {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init_logging(&config.observability);
    tracing::info!(config = ?cli.config, selected = %config.connection.selected, "ledger-link starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let session = Arc::new(build_session(&config)?);

    match cli.command {
        Commands::Status => status(&session).await?,
        Commands::Watch { addresses } => watch(session, config, &cli.config, addresses).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_session(config: &ClientConfig) -> Result<ProviderSession, Box<dyn std::error::Error>> {
    let factory = JrpcTransportFactory::new(JrpcOptions {
        request_timeout: Duration::from_secs(config.connection.connect_timeout_secs),
        poll_interval: Duration::from_millis(config.subscriptions.poll_interval_ms),
        page_size: config.subscriptions.history_page_size,
    });
    let collaborators = Collaborators {
        runtime: Arc::new(WatchOnlyRuntime),
        keystore: Arc::new(NoKeys),
        accounts: Arc::new(NoKeys),
        clock: Arc::new(Clock::new()),
    };
    Ok(ProviderSession::new(config, Arc::new(factory), collaborators)?)
}

async fn status(session: &ProviderSession) -> Result<(), Box<dyn std::error::Error>> {
    session.connection().with_transport(|_| async {}).await?;
    let state = session.handle(ProviderRequest::GetProviderState).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn watch(
    session: Arc<ProviderSession>,
    mut config: ClientConfig,
    config_path: &std::path::Path,
    addresses: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    session.attach_event_sink(event_tx);
    let mut printer_shutdown = shutdown.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => log_event(&event),
                    None => break,
                },
                _ = printer_shutdown.recv() => break,
            }
        }
    });

    let monitor = HealthMonitor::new(
        session.connection().clone(),
        config.connection.health_check.clone(),
    );
    let monitor = tokio::spawn(monitor.run(shutdown.subscribe()));

    let (watcher, mut config_updates) = ConfigWatcher::new(config_path);
    // Dropping the handle stops the watcher
    let _watcher = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
    };

    subscribe_all(&session, &addresses).await?;

    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => {
                shutdown.trigger();
                break;
            }
            Some(new_config) = config_updates.recv() => {
                session.update_presets(new_config.connection.presets.clone());
                if new_config.connection.selected != config.connection.selected {
                    let request = ProviderRequest::ChangeNetwork {
                        network: new_config.connection.selected.clone(),
                    };
                    match session.handle(request).await {
                        Ok(_) => {
                            if let Err(e) = subscribe_all(&session, &addresses).await {
                                tracing::error!(error = %e, "Failed to resubscribe after network change");
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to switch network"),
                    }
                }
                config = new_config;
            }
        }
    }

    session.close().await;
    let _ = monitor.await;
    let _ = printer.await;
    Ok(())
}

async fn subscribe_all(
    session: &ProviderSession,
    addresses: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    for address in addresses {
        let request = ProviderRequest::Subscribe {
            address: address.clone(),
            subscriptions: UpdateKinds::ALL,
        };
        session.handle(request).await?;
        tracing::info!(address = %address, "Watching account");
    }
    Ok(())
}

fn log_event(event: &ProviderEvent) {
    match event {
        ProviderEvent::ContractStateChanged { address, state } => tracing::info!(
            address = %address,
            balance = %state.balance,
            gen_utime = state.gen_timings.gen_utime,
            "Contract state changed"
        ),
        ProviderEvent::TransactionsFound {
            address,
            transactions,
            info,
        } => tracing::info!(
            address = %address,
            count = transactions.len(),
            min_lt = info.min_lt,
            max_lt = info.max_lt,
            "Transactions found"
        ),
        ProviderEvent::MessageStatusUpdated {
            address,
            hash,
            transaction,
        } => tracing::info!(
            address = %address,
            hash = %hash,
            confirmed = transaction.is_some(),
            "Message status updated"
        ),
        ProviderEvent::NetworkChanged {
            selected_connection,
            network_id,
        } => tracing::info!(group = %selected_connection, network_id, "Network changed"),
    }
}
