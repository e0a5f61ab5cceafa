//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define client metrics (connections, subscriptions, message delivery)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `ledger_link_connection_attempts_total` (counter): candidate probes by group, outcome
//! - `ledger_link_connection_health` (gauge): 1=healthy, 0=unhealthy
//! - `ledger_link_active_subscriptions` (gauge): addresses with a live subscription
//! - `ledger_link_messages_total` (counter): send operations by outcome
//! - `ledger_link_message_retries_total` (counter): expired attempts that were retried
//! - `ledger_link_events_dropped_total` (counter): events dropped on a full buffer
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are low-cardinality (group, outcome), never addresses

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_attempt(group: &str, outcome: &'static str) {
    counter!(
        "ledger_link_connection_attempts_total",
        "group" => group.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_connection_health(group: &str, healthy: bool) {
    gauge!("ledger_link_connection_health", "group" => group.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_active_subscriptions(count: usize) {
    gauge!("ledger_link_active_subscriptions").set(count as f64);
}

pub fn record_message_outcome(outcome: &'static str) {
    counter!("ledger_link_messages_total", "outcome" => outcome).increment(1);
}

pub fn record_message_retry() {
    counter!("ledger_link_message_retries_total").increment(1);
}

pub fn record_event_dropped(event: &'static str) {
    counter!("ledger_link_events_dropped_total", "event" => event).increment(1);
}
