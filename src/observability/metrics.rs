//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ws_connections_accepted_total` (counter): accepted TCP connections
//! - `ws_connections_active` (gauge): current connection count
//! - `ws_connections_closed_total` (counter): closed connections by reason
//! - `ws_handshakes_total` (counter): upgrade attempts by outcome
//! - `ws_rpc_requests_total` (counter): JSON-RPC calls handed to the handler
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library users pay nothing
//! - The Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const CONNECTIONS_ACCEPTED_TOTAL: &str = "ws_connections_accepted_total";
pub const CONNECTIONS_ACTIVE: &str = "ws_connections_active";
pub const CONNECTIONS_CLOSED_TOTAL: &str = "ws_connections_closed_total";
pub const HANDSHAKES_TOTAL: &str = "ws_handshakes_total";
pub const RPC_REQUESTS_TOTAL: &str = "ws_rpc_requests_total";

/// Install the global Prometheus recorder and its scrape endpoint.
///
/// Outside a tokio runtime the exporter runs its listener on a background thread.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint listening");
    Ok(())
}

pub fn connection_accepted() {
    counter!(CONNECTIONS_ACCEPTED_TOTAL).increment(1);
}

pub fn set_active_connections(active: usize) {
    gauge!(CONNECTIONS_ACTIVE).set(active as f64);
}

pub fn connection_closed(reason: &'static str) {
    counter!(CONNECTIONS_CLOSED_TOTAL, "reason" => reason).increment(1);
}

pub fn handshake(outcome: &'static str) {
    counter!(HANDSHAKES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn rpc_request() {
    counter!(RPC_REQUESTS_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            CONNECTIONS_ACCEPTED_TOTAL,
            CONNECTIONS_ACTIVE,
            CONNECTIONS_CLOSED_TOTAL,
            HANDSHAKES_TOTAL,
            RPC_REQUESTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.starts_with("ws_") && name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{}' must be snake_case with the ws_ prefix",
                name
            );
        }
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        connection_accepted();
        set_active_connections(3);
        connection_closed("idle_timeout");
        handshake("accepted");
        rpc_request();
    }
}
