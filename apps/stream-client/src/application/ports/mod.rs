//! Application Ports
//!
//! Contracts that infrastructure adapters implement, following the
//! Hexagonal Architecture pattern.
//!
//! - `StreamingTransport` / `TransportBuilder`: what every transport exposes
//!   to the connection facade
//! - `HubConnector` / `HubSession`: what the reconnecting transport needs
//!   from a hub connection
//! - `LegacyConnector` / `LegacyConnection`: what the fallback adapter needs
//!   from the legacy connection library

mod hub_port;
mod legacy_port;
mod transport_port;

pub use hub_port::{
    CLOSE_CONNECTION, FramePayload, FrameStream, HubConnectRequest, HubConnection, HubConnector,
    HubError, HubSession, MessageStream, RENEW_TOKEN, RawFrame, RenewTokenResponse,
    START_STREAMING,
};
pub use legacy_port::{
    LegacyConnection, LegacyConnector, LegacyError, LegacyErrorCallback, LegacyLogCallback,
    NativeStateCallback, native_state,
};
#[cfg(test)]
pub use transport_port::MockTransportBuilder;
pub use transport_port::{
    ConnectionSlowCallback, PlatformCapabilities, ReceivedCallback, StartedCallback,
    StateChangedCallback, StreamingTransport, TransportBuilder, TransportCallbacks,
    TransportError, TransportFailureCallback, TransportOptions, UnauthorizedCallback,
};
