//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer, plus the process-level concerns of the binary.

/// Hub connection: reconnecting transport, wire codec, WebSocket connector.
pub mod hub;

/// Legacy connection library adapter.
pub mod legacy;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry setup.
pub mod telemetry;
