#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! Stream Client - Resilient Streaming Connection
//!
//! Keeps an authenticated server-push connection to a trading API alive
//! across transport and network failures, delivering every server frame to
//! the caller as a [`StreamingMessage`].
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: connection states, the message envelope, session context
//!
//! - **Application**: ports and orchestration
//!   - `ports`: transport contract, hub connection, legacy library
//!   - `services`: the [`Connection`] facade and [`TransportRegistry`]
//!
//! - **Infrastructure**: adapters
//!   - `hub`: reconnecting hub transport and WebSocket connector
//!   - `legacy`: adapter over the legacy connection library
//!   - `config`, `telemetry`, `metrics`: process concerns of the binary
//!
//! # Data Flow
//!
//! ```text
//!                 ┌────────────┐    ┌───────────────┐    ┌────────────┐
//! server frame ──►│ HubSession │───►│ HubTransport  │───►│ Connection │──► caller
//!                 │ (socket)   │    │ normalize and │    │  facade    │
//!                 └────────────┘    │ parse payload │    └─────┬──────┘
//!                                   └───────────────┘          │ failure
//!                                                              ▼
//!                                                     next transport candidate
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Connection types with no external dependencies.
pub mod domain;

/// Application layer - Ports and the connection facade.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    AccessToken, ConnectionState, DataFormat, HubProtocol, HubTransportType, MessageData,
    SessionContext, StreamingMessage, TransportKind,
};

// Ports
pub use application::ports::{
    HubConnector, HubSession, LegacyConnection, LegacyConnector, PlatformCapabilities,
    StreamingTransport, TransportBuilder, TransportError, TransportOptions,
};

// Facade
pub use application::services::{
    Connection, ConnectionOptions, FacadeState, QueryParams, TotalFailureCallback,
    TransportCandidate, TransportRegistry,
};

// Transports
pub use infrastructure::hub::{
    HubTransport, HubTransportBuilder, KeepAliveConfig, RetryPolicy, WsHubConnector,
};
pub use infrastructure::legacy::{LegacyTransport, LegacyTransportBuilder};

// Configuration
pub use infrastructure::config::{ConfigError, StreamClientConfig};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
