//! Active health checking of the bound transport.
//!
//! # Responsibilities
//! - Periodically probe the active connection
//! - Update its health state based on results
//! - Leave reselection to the next scoped use

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::connection::controller::ConnectionController;
use crate::observability::metrics;

pub struct HealthMonitor {
    controller: Arc<ConnectionController>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(controller: Arc<ConnectionController>, config: HealthCheckConfig) -> Self {
        Self { controller, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Health monitor starting");

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        // The first tick completes immediately; the connection was just probed.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_active().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe the active connection once.
    ///
    /// Returns `None` when there is no connection to probe.
    pub async fn check_active(&self) -> Option<bool> {
        let active = self.controller.active()?;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let healthy = match time::timeout(timeout, active.transport.network_info()).await {
            Ok(Ok(info)) if info.network_id == active.network_id => true,
            Ok(Ok(info)) => {
                tracing::warn!(
                    endpoint = %active.endpoint,
                    expected = active.network_id,
                    actual = info.network_id,
                    "Health check failed: network id changed"
                );
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %active.endpoint, error = %e, "Health check failed");
                false
            }
            Err(_) => {
                tracing::warn!(endpoint = %active.endpoint, "Health check failed: timeout");
                false
            }
        };

        if healthy {
            if active.health.mark_success(self.config.healthy_threshold as usize) {
                tracing::info!(endpoint = %active.endpoint, "Connection healthy");
            }
        } else if active.health.mark_failure(self.config.unhealthy_threshold as usize) {
            tracing::warn!(
                group = %active.group,
                endpoint = %active.endpoint,
                "Connection marked unhealthy, reselecting on next use"
            );
        }

        metrics::record_connection_health(&active.group, active.is_healthy());
        Some(healthy)
    }
}
