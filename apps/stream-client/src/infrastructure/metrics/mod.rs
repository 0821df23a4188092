//! Prometheus Metrics Module
//!
//! Records connection health through the `metrics` facade. Without an
//! installed recorder every call is a no-op, so library users pay nothing
//! unless they opt in.
//!
//! # Metrics
//!
//! - `stream_client_frames_received_total{format}`
//! - `stream_client_parse_failures_total`
//! - `stream_client_reconnect_attempts_total`
//! - `stream_client_transport_fallbacks_total{from}`
//! - `stream_client_token_renewals_total{outcome}`
//! - `stream_client_connection_state` (numeric state code)

use std::net::{Ipv4Addr, SocketAddrV4};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::connection::{ConnectionState, DataFormat, TransportKind};
use crate::infrastructure::hub::auth::RenewStatus;

// =============================================================================
// Exporter
// =============================================================================

/// Serve Prometheus metrics on `0.0.0.0:{port}/metrics`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener or recorder cannot be installed.
pub fn install_exporter(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        .install()?;

    register_metrics();
    tracing::info!(port, "Prometheus exporter listening");
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "stream_client_frames_received_total",
        "Frames delivered to the caller by data format"
    );
    describe_counter!(
        "stream_client_parse_failures_total",
        "Frames that could not be normalized or parsed"
    );
    describe_counter!(
        "stream_client_reconnect_attempts_total",
        "Hub reconnect attempts"
    );
    describe_counter!(
        "stream_client_transport_fallbacks_total",
        "Transport failures that moved the facade to the next candidate"
    );
    describe_counter!(
        "stream_client_token_renewals_total",
        "RenewToken answers by outcome"
    );
    describe_gauge!(
        "stream_client_connection_state",
        "Current connection state code"
    );
}

// =============================================================================
// Recording
// =============================================================================

/// Record a frame delivered to the caller.
pub fn record_frame_received(format: DataFormat) {
    counter!(
        "stream_client_frames_received_total",
        "format" => format.as_str()
    )
    .increment(1);
}

/// Record a frame that failed to parse.
pub fn record_parse_failure() {
    counter!("stream_client_parse_failures_total").increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect_attempt() {
    counter!("stream_client_reconnect_attempts_total").increment(1);
}

/// Record a fallback away from a failed transport.
pub fn record_transport_fallback(from: TransportKind) {
    counter!(
        "stream_client_transport_fallbacks_total",
        "from" => from.as_str()
    )
    .increment(1);
}

/// Record a `RenewToken` answer.
pub fn record_token_renewal(status: RenewStatus) {
    counter!(
        "stream_client_token_renewals_total",
        "outcome" => status.as_str()
    )
    .increment(1);
}

/// Publish the current connection state.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("stream_client_connection_state").set(f64::from(state.code()));
}

// =============================================================================
// Tests
// =============================================================================
