//! Application Layer - Port definitions and the connection facade.
//!
//! Ports describe what the facade and the reconnecting transport need from
//! the outside world; services hold the orchestration logic.

/// Port interfaces for transports, hub connections and the legacy library.
pub mod ports;

/// Connection facade and transport registry.
pub mod services;
